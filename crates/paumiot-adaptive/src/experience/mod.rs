//! Experience module
//!
//! Bounded FIFO store of completed transactions, shared by the dispatcher
//! (writer) and the policy distiller (reader).

pub mod store;

pub use store::{ExperienceStore, StoreStats};

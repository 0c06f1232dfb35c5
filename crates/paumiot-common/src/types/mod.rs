//! Core data types for the PAUMIoT adaptive core

pub mod api;
pub mod arm;
pub mod context;
pub mod device;
pub mod experience;

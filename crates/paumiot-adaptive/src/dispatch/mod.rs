//! Dispatch path: arm choice, protocol send, outcome recording

pub mod dispatcher;
pub mod reward;
pub mod transport;

pub use dispatcher::{DecisionSource, DispatchReport, Dispatcher, LearningComponents, TransactionState};
pub use reward::RewardModel;
pub use transport::{Delivery, DeviceRegistry, EmptyRegistry, ProtocolTransport};

//! Collaborator seams: protocol transport and device registry

use async_trait::async_trait;
use paumiot_common::{Arm, DeviceProfile, TransportError};

/// Successful delivery as reported by a transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delivery {
    pub latency_ms: f64,
    pub bytes_sent: u64,
}

/// Sends one payload over the selected protocol
///
/// Implementations should bound their own send time; the dispatcher also
/// wraps every call in a timeout.
#[async_trait]
pub trait ProtocolTransport: Send + Sync {
    async fn send(&self, arm: Arm, device_id: &str, payload: &[u8]) -> Result<Delivery, TransportError>;
}

/// Device attributes needed to build a transaction context
pub trait DeviceRegistry: Send + Sync {
    fn lookup(&self, device_id: &str) -> Option<DeviceProfile>;
}

/// Registry that knows no devices
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRegistry;

impl DeviceRegistry for EmptyRegistry {
    fn lookup(&self, _device_id: &str) -> Option<DeviceProfile> {
        None
    }
}

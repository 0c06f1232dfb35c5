//! Arm - the closed set of wire protocols the core can route over
//!
//! The bandit, the distilled tree, and the stats aggregator all index
//! per-protocol state by [`Arm::index`], so the enumeration order below is
//! also the tie-break order everywhere in the core.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::PaumiotError;

/// A selectable protocol in the bandit formulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arm {
    /// MQTT publish over a broker connection
    Mqtt,
    /// Constrained Application Protocol (UDP)
    Coap,
    /// Plain HTTP POST
    Http,
    /// PRIoTP with acknowledgements and retransmission
    PriotpReliable,
    /// PRIoTP fire-and-forget datagrams
    PriotpUnreliable,
}

impl Arm {
    /// Number of supported arms
    pub const COUNT: usize = 5;

    /// All arms in enumeration order
    pub const ALL: [Arm; Arm::COUNT] = [
        Arm::Mqtt,
        Arm::Coap,
        Arm::Http,
        Arm::PriotpReliable,
        Arm::PriotpUnreliable,
    ];

    /// Position of this arm in [`Arm::ALL`]
    pub const fn index(self) -> usize {
        match self {
            Arm::Mqtt => 0,
            Arm::Coap => 1,
            Arm::Http => 2,
            Arm::PriotpReliable => 3,
            Arm::PriotpUnreliable => 4,
        }
    }

    /// Inverse of [`Arm::index`]
    pub fn from_index(index: usize) -> Option<Arm> {
        Arm::ALL.get(index).copied()
    }

    /// Stable wire name, matching the REST counter keys
    pub const fn as_str(self) -> &'static str {
        match self {
            Arm::Mqtt => "mqtt",
            Arm::Coap => "coap",
            Arm::Http => "http",
            Arm::PriotpReliable => "priotp_reliable",
            Arm::PriotpUnreliable => "priotp_unreliable",
        }
    }

    /// Estimated framing overhead per message in bytes
    ///
    /// Application-layer headers only (fixed header, topic/URI, options,
    /// sequence fields); transport-layer headers are the same order of
    /// magnitude for every arm and are left out.
    pub const fn frame_overhead_bytes(self) -> u64 {
        match self {
            Arm::Mqtt => 22,
            Arm::Coap => 12,
            Arm::Http => 180,
            Arm::PriotpReliable => 14,
            Arm::PriotpUnreliable => 6,
        }
    }

    /// Estimated bytes on the wire for a payload of the given size
    pub const fn estimated_frame_bytes(self, payload_size: u64) -> u64 {
        payload_size + self.frame_overhead_bytes()
    }
}

impl std::fmt::Display for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Arm {
    type Err = PaumiotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mqtt" => Ok(Arm::Mqtt),
            "coap" => Ok(Arm::Coap),
            "http" => Ok(Arm::Http),
            "priotp_reliable" | "priotp-reliable" => Ok(Arm::PriotpReliable),
            "priotp_unreliable" | "priotp-unreliable" => Ok(Arm::PriotpUnreliable),
            other => Err(PaumiotError::UnknownArm(other.to_string())),
        }
    }
}

//! Error types for the PAUMIoT adaptive core
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

/// Result type alias using PaumiotError
pub type Result<T> = std::result::Result<T, PaumiotError>;

/// Unified error type for PAUMIoT operations
#[derive(Debug, Error)]
pub enum PaumiotError {
    // Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    // A protocol name outside the supported arm set
    #[error("Unknown protocol arm: {0}")]
    UnknownArm(String),

    // Boundary validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Registry errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Protocol transport failures
///
/// Every variant is recovered by the dispatcher as a failed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Send timed out after {elapsed_ms}ms (limit: {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Delivery rejected by peer: {0}")]
    Rejected(String),

    #[error("Send cancelled after {elapsed_ms}ms")]
    Cancelled { elapsed_ms: u64 },
}

/// Checkpoint persistence errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint is corrupted: {0}")]
    Corrupted(String),

    #[error("Checkpoint checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported checkpoint format version {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },
}

// Implement From for common external error types
impl From<serde_json::Error> for PaumiotError {
    fn from(err: serde_json::Error) -> Self {
        PaumiotError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for PaumiotError {
    fn from(err: std::io::Error) -> Self {
        PaumiotError::Checkpoint(CheckpointError::Io(err))
    }
}

impl From<anyhow::Error> for PaumiotError {
    fn from(err: anyhow::Error) -> Self {
        PaumiotError::Internal(err.to_string())
    }
}

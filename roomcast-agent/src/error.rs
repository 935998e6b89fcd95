//! Error types for roomcast-agent

use thiserror::Error;

use roomcast_state::{DeviceId, StateError};

/// Result type for roomcast-agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur while driving devices
#[derive(Debug, Error)]
pub enum AgentError {
    /// A snapshot request failed at the transport
    #[error("snapshot request failed for {device}: {reason}")]
    Snapshot { device: DeviceId, reason: String },

    /// A snapshot request did not answer within the configured timeout
    #[error("snapshot request timed out for {device}")]
    Timeout { device: DeviceId },

    /// The device refused or failed a control command
    #[error("command rejected by {device}: {reason}")]
    CommandRejected { device: DeviceId, reason: String },

    /// The push subscription could not be established
    #[error("subscription failed for {device}: {reason}")]
    SubscriptionFailed { device: DeviceId, reason: String },

    /// The device id is not registered
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// The registry is shutting down and accepts no more work
    #[error("registry is shutting down")]
    ShuttingDown,

    /// Error from the state layer
    #[error(transparent)]
    State(#[from] StateError),
}

impl AgentError {
    /// Whether this error represents a transient transport problem
    ///
    /// Transient errors are retried with backoff and never treated as
    /// fatal; the device is polled indefinitely.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Snapshot { .. } | AgentError::Timeout { .. })
    }
}

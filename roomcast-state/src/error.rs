//! Error types for roomcast-state

use thiserror::Error;

use crate::model::DeviceId;

/// Result type for roomcast-state operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur during state management
#[derive(Debug, Error)]
pub enum StateError {
    /// Device id is not registered in the store
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Device id is already registered in the store
    #[error("device already registered: {0}")]
    AlreadyRegistered(DeviceId),
}

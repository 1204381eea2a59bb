use thiserror::Error;

use crate::domain::Device;

/// Failure taxonomy for a decision pass.
///
/// `DataUnavailable` and `ConfigIncomplete` are expected, transient conditions:
/// the affected device is skipped for the tick without an error log.
/// `DeviceUnreachable`, `Storage`, `Malformed` and `Internal` are real failures and get
/// logged (throttled per device).
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("{device} unreachable: {message}")]
    DeviceUnreachable { device: Device, message: String },

    #[error("Configuration incomplete: {0}")]
    ConfigIncomplete(String),

    #[error("Malformed state: {0}")]
    Malformed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A decision pass panicked.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    pub fn unreachable(device: Device, err: impl std::fmt::Display) -> Self {
        ControlError::DeviceUnreachable {
            device,
            message: err.to_string(),
        }
    }

    /// Expected conditions that skip a device silently.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            ControlError::DataUnavailable(_) | ControlError::ConfigIncomplete(_)
        )
    }
}

//! Unified error type for every release, targeting, storage and transport operation.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed input
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Another release already uses this version/type/product combination
    #[error("Release version {version} ({release_type}) already exists for this product")]
    DuplicateVersion {
        /// Conflicting version string
        version: String,
        /// Release type of the conflicting release
        release_type: String,
    },

    /// The requested transition or edit is not allowed from the current status
    #[error("Cannot {action} release {release_id} while it is {status}")]
    InvalidState {
        /// Release the action targeted
        release_id: i64,
        /// Status the release was in
        status: String,
        /// Attempted action (publish, deprecate, delete, edit, download)
        action: String,
    },

    /// No release with this id
    #[error("Release not found: {id}")]
    ReleaseNotFound {
        /// Requested release id
        id: i64,
    },

    /// No device with this id
    #[error("Device not found: {id}")]
    DeviceNotFound {
        /// Requested device id
        id: i64,
    },

    /// No distributor with this id
    #[error("Distributor not found: {id}")]
    DistributorNotFound {
        /// Requested distributor id
        id: i64,
    },

    /// Object storage rejected an artifact operation
    #[error("Storage error: {message}")]
    Storage {
        /// Failure detail
        message: String,
    },

    /// Network or authentication failure while talking to the upload endpoint
    #[error("Transport error: {message}")]
    Transport {
        /// Failure detail
        message: String,
    },

    /// The caller cancelled an in-flight upload
    #[error("Upload cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is incomplete
    #[error("Configuration error: {message}")]
    Config {
        /// Failure detail
        message: String,
    },

    /// Database error from `SeaORM`
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Local I/O error (reading an artifact from disk)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is meant to be shown to the operator as a notification
    /// (bad input, invalid transition, missing record) rather than treated as an
    /// operational failure.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::DuplicateVersion { .. }
                | Self::InvalidState { .. }
                | Self::ReleaseNotFound { .. }
                | Self::DeviceNotFound { .. }
                | Self::DistributorNotFound { .. }
                | Self::Cancelled
        )
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(release_id: i64, status: impl ToString, action: &str) -> Self {
        Self::InvalidState {
            release_id,
            status: status.to_string(),
            action: action.to_string(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

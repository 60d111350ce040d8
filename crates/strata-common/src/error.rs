//! Error types for the strata tuple storage core.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Coarse classification of an error, used by callers that only need to know
/// whether to reschedule, fail the query, or report a setup problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Data is not produced yet; retry later.
    Blocked,
    /// Storage read/write failure.
    Io,
    /// Unexpected internal inconsistency or contract violation.
    Component,
    /// Invalid configuration.
    Config,
}

/// Errors that can occur in strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Cooperative "not yet available" signal. Carries no state, so every
    /// raise is interchangeable.
    #[error("Data not yet available, retry later")]
    Blocked,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Storage unit removed: {name}")]
    StoreRemoved { name: String },

    // Component errors
    #[error("LOB reference not found: {0}")]
    LobNotFound(String),

    #[error("Managed batch removed: {0}")]
    BatchRemoved(u64),

    #[error("Tuple buffer removed: {0}")]
    BufferRemoved(String),

    #[error("Row {row} is not stored in tuple buffer {buffer}")]
    RowUnavailable { row: u64, buffer: String },

    #[error("Tree page missing: {0}")]
    PageMissing(u32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Returns true for the cooperative blocked signal.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self, StrataError::Blocked)
    }

    /// Returns the category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            StrataError::Blocked => ErrorCategory::Blocked,
            StrataError::Io(_) | StrataError::IoError(_) | StrataError::StoreRemoved { .. } => {
                ErrorCategory::Io
            }
            StrataError::ConfigError(_) => ErrorCategory::Config,
            StrataError::LobNotFound(_)
            | StrataError::BatchRemoved(_)
            | StrataError::BufferRemoved(_)
            | StrataError::RowUnavailable { .. }
            | StrataError::PageMissing(_)
            | StrataError::InvalidArgument(_)
            | StrataError::Internal(_) => ErrorCategory::Component,
        }
    }

    /// Short read from a storage unit.
    pub fn not_enough_bytes() -> Self {
        StrataError::IoError("not enough bytes available".to_string())
    }
}

//! Core error taxonomy for reelflow.
//!
//! Integrity violations and per-conflict failures are data, not errors: they
//! are captured in result objects. `CoreError` covers the structural failures
//! that leave nothing to report.

/// reelflow core errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid record payload: {0}")]
    InvalidRecord(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("conflict resolution error: {0}")]
    Conflict(#[from] crate::conflict::ConflictError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for reelflow core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

//! Error types for conflict resolution.

use thiserror::Error;

/// Errors produced while resolving a single conflict.
///
/// Batch resolution never propagates these: each one is captured in the
/// per-conflict log with the existing record kept as the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// No built-in, custom or conditional strategy has this name.
    #[error("unsupported resolution strategy: {strategy}")]
    UnsupportedStrategy { strategy: String },

    /// A conditional strategy exists but its condition rejects the conflict.
    #[error("conditional strategy '{strategy}' does not apply to {conflict_type} conflict")]
    ConditionNotMet {
        strategy: String,
        conflict_type: String,
    },

    /// A custom resolver reported a failure.
    #[error("custom resolver '{resolver}' failed: {reason}")]
    ResolverFailed { resolver: String, reason: String },

    /// The records cannot be combined by the requested strategy.
    #[error("cannot apply '{strategy}': {reason}")]
    InvalidRecord { strategy: String, reason: String },
}

/// Convenience result alias.
pub type ConflictResult<T> = std::result::Result<T, ConflictError>;

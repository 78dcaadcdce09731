//! reelflow core: record helpers, integrity validation and conflict
//! resolution for the video-production data pipeline.

pub mod conflict;
pub mod error;
pub mod integrity;
pub mod obs;
pub mod record;
pub mod telemetry;

pub use conflict::{
    BatchResolutionOptions, BatchResolutionSummary, ConditionalStrategy, ConflictError,
    ConflictResolution, ConflictResolver, ConflictSeverity, ConflictType, DataConflict,
    PriorityRule, ResolutionStrategy,
};
pub use error::{CoreError, Result};
pub use integrity::{
    BatchIntegrityResult, BatchValidationOptions, FnRule, IntegrityCheckResult, IntegrityRule,
    IntegrityValidator, IntegrityViolation, RecordSchema, Severity, ValidationContext,
};
pub use record::{RecordCount, SemVer};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

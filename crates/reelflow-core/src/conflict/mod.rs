//! Conflict detection and resolution between incoming and existing records.
//!
//! - [`detect`]: classifies mismatches by type and severity
//! - [`strategy`]: built-in strategies (`skip`, `overwrite`, `merge`, `rename`,
//!   `use_latest_version`, `use_latest_timestamp`)
//! - [`resolver::ConflictResolver`]: custom resolvers, conditional strategies
//! - [`batch`]: prioritized batch resolution

pub mod batch;
pub mod detect;
pub mod error;
pub mod model;
pub mod resolver;
pub mod strategy;

pub use batch::{
    BatchResolutionOptions, BatchResolutionSummary, ConflictStats, PriorityRule,
    ResolutionLogEntry,
};
pub use detect::{detect_conflicts, DEFAULT_TRACKED_FIELDS, PARENT_ID_FIELD};
pub use error::{ConflictError, ConflictResult};
pub use model::{ConflictResolution, ConflictSeverity, ConflictType, DataConflict};
pub use resolver::{ConditionalStrategy, ConflictCondition, ConflictResolver, ResolverFn};
pub use strategy::{apply_builtin, merge_records, ResolutionStrategy, PRESERVED_FIELDS};

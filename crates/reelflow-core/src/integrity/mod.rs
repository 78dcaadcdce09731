//! Record integrity validation.
//!
//! Provides:
//! - [`schema::RecordSchema`]: declarative field contracts and shape checks
//! - [`business`]: recomputed-metadata checks (token estimate, difficulty)
//! - [`rule::IntegrityRule`] / [`rule::FnRule`]: pluggable custom rules
//! - [`validator::IntegrityValidator`]: layered validation, scoring, auto-repair
//! - [`batch`]: duplicate detection and chunked batch validation
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use reelflow_core::integrity::{IntegrityValidator, ValidationContext};
//!
//! let validator = IntegrityValidator::new();
//! let result = validator.validate(&record, &ValidationContext::default().with_auto_repair());
//! ```

pub mod batch;
pub mod business;
pub mod model;
pub mod rule;
pub mod schema;
pub mod validator;

pub use batch::{
    find_duplicate_ids, BatchIntegrityResult, BatchValidationOptions, ItemValidation,
    DUPLICATE_IDS,
};
pub use business::{estimate_tokens, DIFFICULTY_MISMATCH, TOKEN_ESTIMATE_MISMATCH};
pub use model::{
    quality_score, IntegrityCheckResult, IntegrityViolation, RepairEntry, RepairReport, Severity,
    ValidationContext,
};
pub use rule::{FnRule, IntegrityRule, RepairFn, RepairOutcome, RuleOutcome};
pub use schema::{
    FieldFormat, FieldRule, FieldType, RecordSchema, INVALID_ENUM_VALUE, INVALID_FORMAT,
    INVALID_TYPE, INVALID_VALUE_RANGE, MISSING_REQUIRED_FIELD,
};
pub use validator::{IntegrityValidator, MISSING_REFERENCE};

//! Pluggable integrity rules.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::integrity::model::{IntegrityViolation, Severity, ValidationContext};

/// Result of a repair action: the repaired record, or why it failed.
pub type RepairOutcome = std::result::Result<Value, String>;

/// Repair action applied to a whole record for one violation.
pub type RepairFn = Arc<dyn Fn(&Value, &IntegrityViolation) -> RepairOutcome + Send + Sync>;

/// Outcome of evaluating one rule against one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub valid: bool,
    pub message: Option<String>,
    pub field: Option<String>,
}

impl RuleOutcome {
    pub fn pass() -> Self {
        Self {
            valid: true,
            message: None,
            field: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
            field: None,
        }
    }

    pub fn at(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// A custom integrity rule.
///
/// Rules are registered once on an [`IntegrityValidator`] and evaluated in
/// registration order on every validation call. `error` and `critical` rules
/// contribute violations; `info` and `warning` rules contribute warnings.
///
/// [`IntegrityValidator`]: crate::integrity::IntegrityValidator
pub trait IntegrityRule: Send + Sync {
    fn id(&self) -> &str;

    fn severity(&self) -> Severity;

    /// Gate: the rule is skipped when this returns `false`.
    fn applies(&self, _record: &Value, _ctx: &ValidationContext) -> bool {
        true
    }

    fn validate(&self, record: &Value, ctx: &ValidationContext) -> RuleOutcome;

    /// Rule-attached repair. Takes precedence over repair strategies
    /// registered for the same rule id.
    fn repair(&self, _record: &Value, _violation: &IntegrityViolation) -> Option<RepairOutcome> {
        None
    }

    fn has_repair(&self) -> bool {
        false
    }
}

type Predicate = Arc<dyn Fn(&Value, &ValidationContext) -> bool + Send + Sync>;
type Check = Arc<dyn Fn(&Value, &ValidationContext) -> RuleOutcome + Send + Sync>;

/// Closure-backed [`IntegrityRule`].
#[derive(Clone)]
pub struct FnRule {
    id: String,
    severity: Severity,
    condition: Option<Predicate>,
    check: Check,
    repair: Option<RepairFn>,
}

impl FnRule {
    pub fn new<F>(id: impl Into<String>, severity: Severity, check: F) -> Self
    where
        F: Fn(&Value, &ValidationContext) -> RuleOutcome + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            severity,
            condition: None,
            check: Arc::new(check),
            repair: None,
        }
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Value, &ValidationContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_repair<F>(mut self, repair: F) -> Self
    where
        F: Fn(&Value, &IntegrityViolation) -> RepairOutcome + Send + Sync + 'static,
    {
        self.repair = Some(Arc::new(repair));
        self
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .field("conditional", &self.condition.is_some())
            .field("repairable", &self.repair.is_some())
            .finish()
    }
}

impl IntegrityRule for FnRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn applies(&self, record: &Value, ctx: &ValidationContext) -> bool {
        self.condition.as_ref().map_or(true, |c| c(record, ctx))
    }

    fn validate(&self, record: &Value, ctx: &ValidationContext) -> RuleOutcome {
        (self.check)(record, ctx)
    }

    fn repair(&self, record: &Value, violation: &IntegrityViolation) -> Option<RepairOutcome> {
        self.repair.as_ref().map(|r| r(record, violation))
    }

    fn has_repair(&self) -> bool {
        self.repair.is_some()
    }
}

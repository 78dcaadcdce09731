//! Integrity result types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::record_id;

/// Severity of an integrity finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// `error` and `critical` findings make a record invalid.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }

    /// Quality-score penalty for a violation of this severity.
    pub fn penalty(self) -> f64 {
        match self {
            Self::Critical => 0.3,
            Self::Error => 0.2,
            Self::Warning => 0.1,
            Self::Info => 0.05,
        }
    }
}

/// Flat penalty applied per entry in the warnings list.
pub const WARNING_PENALTY: f64 = 0.02;

/// One failed integrity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub rule_id: String,
    pub severity: Severity,
    /// Dotted path of the offending field, when the check is field-scoped.
    pub field: Option<String>,
    pub message: String,
    pub auto_repairable: bool,
    /// Structured detail, e.g. the duplicated id and its count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntegrityViolation {
    pub fn new(rule_id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            field: None,
            message: message.into(),
            auto_repairable: false,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn repairable(mut self, auto_repairable: bool) -> Self {
        self.auto_repairable = auto_repairable;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One attempted repair, restricted to the affected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairEntry {
    pub rule_id: String,
    pub field: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub success: bool,
    pub error: Option<String>,
}

/// Repair artifacts of one validation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub repaired_data: Value,
    pub successful: Vec<RepairEntry>,
    pub failed: Vec<RepairEntry>,
}

impl RepairReport {
    pub fn repaired_count(&self) -> usize {
        self.successful.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityCheckResult {
    pub is_valid: bool,
    pub quality_score: f64,
    pub violations: Vec<IntegrityViolation>,
    pub warnings: Vec<IntegrityViolation>,
    pub repair: Option<RepairReport>,
}

impl IntegrityCheckResult {
    /// Build a result, deriving validity and score from the findings.
    pub fn from_findings(
        violations: Vec<IntegrityViolation>,
        warnings: Vec<IntegrityViolation>,
        repair: Option<RepairReport>,
    ) -> Self {
        Self {
            is_valid: !violations.iter().any(|v| v.severity.is_blocking()),
            quality_score: quality_score(&violations, &warnings),
            violations,
            warnings,
            repair,
        }
    }

    /// Whether any repair succeeded.
    pub fn was_repaired(&self) -> bool {
        self.repair
            .as_ref()
            .is_some_and(|r| !r.successful.is_empty())
    }

    pub fn has_violation(&self, rule_id: &str) -> bool {
        self.violations.iter().any(|v| v.rule_id == rule_id)
    }
}

/// Score in `[0, 1]`: 1.0 minus severity penalties and warning penalties.
pub fn quality_score(violations: &[IntegrityViolation], warnings: &[IntegrityViolation]) -> f64 {
    let penalty: f64 = violations.iter().map(|v| v.severity.penalty()).sum::<f64>()
        + warnings.len() as f64 * WARNING_PENALTY;
    (1.0 - penalty).clamp(0.0, 1.0)
}

/// Caller-supplied context for a validation call.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Attempt repairs for auto-repairable violations.
    pub auto_repair: bool,
    /// Check that referenced records exist in `existing_ids`.
    pub check_references: bool,
    /// Identifiers of records already stored.
    pub existing_ids: HashSet<String>,
}

impl ValidationContext {
    pub fn with_auto_repair(mut self) -> Self {
        self.auto_repair = true;
        self
    }

    /// Opt into reference checks against `existing`.
    pub fn with_existing(mut self, existing: &[Value]) -> Self {
        self.check_references = true;
        self.existing_ids = existing
            .iter()
            .filter_map(record_id)
            .map(str::to_string)
            .collect();
        self
    }
}

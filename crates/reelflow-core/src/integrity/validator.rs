//! Record integrity validation and auto-repair.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::integrity::business::{
    check_business_rules, computed_difficulty, estimate_tokens, DIFFICULTY_FIELD,
    DIFFICULTY_MISMATCH, ESTIMATED_TOKENS_FIELD, TOKEN_ESTIMATE_MISMATCH,
};
use crate::integrity::model::{
    IntegrityCheckResult, IntegrityViolation, RepairEntry, RepairReport, Severity,
    ValidationContext,
};
use crate::integrity::rule::{IntegrityRule, RepairFn, RepairOutcome};
use crate::integrity::schema::{
    RecordSchema, INVALID_ENUM_VALUE, INVALID_VALUE_RANGE, MISSING_REQUIRED_FIELD,
};
use crate::record::{get_path, set_path};

pub const MISSING_REFERENCE: &str = "MISSING_REFERENCE";

/// Fields holding references to other records.
const PARENT_FIELD: &str = "parentId";
const REFERENCES_FIELD: &str = "references";

#[derive(Clone, Default)]
struct RuleRegistry {
    rules: Vec<Arc<dyn IntegrityRule>>,
    repairs: HashMap<String, RepairFn>,
}

/// Validates records against a [`RecordSchema`], built-in business and
/// reference checks, and registered custom rules.
///
/// Cloning is cheap: the schema and registry are shared. Registration uses
/// copy-on-write, so clones handed to in-flight batch tasks keep the registry
/// they started with.
#[derive(Clone)]
pub struct IntegrityValidator {
    schema: Arc<RecordSchema>,
    registry: Arc<RuleRegistry>,
}

impl Default for IntegrityValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IntegrityValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityValidator")
            .field("schema", &self.schema.name)
            .field("custom_rules", &self.rule_ids())
            .field("repair_strategies", &self.registry.repairs.len())
            .finish()
    }
}

impl IntegrityValidator {
    /// Validator for prompt-template records.
    pub fn new() -> Self {
        Self::with_schema(RecordSchema::prompt_template())
    }

    /// Validator for an arbitrary schema, with the default repair strategies
    /// registered.
    pub fn with_schema(schema: RecordSchema) -> Self {
        let mut validator = Self {
            schema: Arc::new(schema),
            registry: Arc::new(RuleRegistry::default()),
        };
        validator.register_default_repairs();
        validator
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Ids of registered custom rules, in evaluation order.
    pub fn rule_ids(&self) -> Vec<&str> {
        self.registry.rules.iter().map(|r| r.id()).collect()
    }

    /// Register a custom rule. Call during setup, not mid-validation.
    pub fn add_custom_rule<R>(&mut self, rule: R)
    where
        R: IntegrityRule + 'static,
    {
        Arc::make_mut(&mut self.registry).rules.push(Arc::new(rule));
    }

    /// Register (or replace) the repair strategy for a rule id.
    pub fn add_repair_strategy<F>(&mut self, rule_id: impl Into<String>, repair: F)
    where
        F: Fn(&Value, &IntegrityViolation) -> RepairOutcome + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.registry)
            .repairs
            .insert(rule_id.into(), Arc::new(repair));
    }

    /// Validate one record.
    ///
    /// Layers run in order and accumulate: schema shape, business logic,
    /// references (when `ctx.check_references`), custom rules. With
    /// `ctx.auto_repair`, repairable findings are repaired and the repaired
    /// ones dropped from the result without a second validation pass.
    pub fn validate(&self, record: &Value, ctx: &ValidationContext) -> IntegrityCheckResult {
        let mut violations = self.schema.validate_shape(record);
        violations.extend(check_business_rules(record));
        if ctx.check_references {
            violations.extend(check_references(record, ctx));
        }

        let mut warnings = Vec::new();
        for rule in &self.registry.rules {
            if !rule.applies(record, ctx) {
                continue;
            }
            let outcome = rule.validate(record, ctx);
            if outcome.valid {
                continue;
            }
            let mut violation = IntegrityViolation::new(
                rule.id(),
                rule.severity(),
                outcome
                    .message
                    .unwrap_or_else(|| format!("rule `{}` failed", rule.id())),
            )
            .repairable(rule.has_repair() || self.registry.repairs.contains_key(rule.id()));
            violation.field = outcome.field;

            if rule.severity().is_blocking() {
                violations.push(violation);
            } else {
                warnings.push(violation);
            }
        }

        if !ctx.auto_repair {
            return IntegrityCheckResult::from_findings(violations, warnings, None);
        }

        let mut candidate = record.clone();
        let mut report = RepairReport {
            repaired_data: Value::Null,
            successful: Vec::new(),
            failed: Vec::new(),
        };
        let violations = self.repair_all(&mut candidate, violations, &mut report);
        let warnings = self.repair_all(&mut candidate, warnings, &mut report);
        report.repaired_data = candidate;

        debug!(
            repaired = report.repaired_count(),
            failed = report.failed_count(),
            "auto-repair finished"
        );

        IntegrityCheckResult::from_findings(violations, warnings, Some(report))
    }

    /// Repair every auto-repairable finding in `findings`, returning the ones
    /// that remain.
    fn repair_all(
        &self,
        candidate: &mut Value,
        findings: Vec<IntegrityViolation>,
        report: &mut RepairReport,
    ) -> Vec<IntegrityViolation> {
        let mut remaining = Vec::new();
        for violation in findings {
            if !violation.auto_repairable {
                remaining.push(violation);
                continue;
            }

            let before = field_snapshot(candidate, &violation);
            match self.apply_repair(candidate, &violation) {
                Ok(repaired) => {
                    let after = field_snapshot(&repaired, &violation);
                    *candidate = repaired;
                    report.successful.push(RepairEntry {
                        rule_id: violation.rule_id.clone(),
                        field: violation.field.clone(),
                        before,
                        after,
                        success: true,
                        error: None,
                    });
                }
                Err(error) => {
                    report.failed.push(RepairEntry {
                        rule_id: violation.rule_id.clone(),
                        field: violation.field.clone(),
                        before,
                        after: None,
                        success: false,
                        error: Some(error),
                    });
                    remaining.push(violation);
                }
            }
        }
        remaining
    }

    fn apply_repair(&self, candidate: &Value, violation: &IntegrityViolation) -> RepairOutcome {
        let attached = self
            .registry
            .rules
            .iter()
            .find(|r| r.id() == violation.rule_id && r.has_repair())
            .and_then(|r| r.repair(candidate, violation));
        if let Some(outcome) = attached {
            return outcome;
        }

        match self.registry.repairs.get(&violation.rule_id) {
            Some(repair) => repair(candidate, violation),
            None => Err(format!(
                "no repair strategy registered for `{}`",
                violation.rule_id
            )),
        }
    }

    fn register_default_repairs(&mut self) {
        let schema = Arc::clone(&self.schema);
        self.add_repair_strategy(MISSING_REQUIRED_FIELD, move |record, violation| {
            write_schema_default(&schema, record, violation)
        });

        let schema = Arc::clone(&self.schema);
        self.add_repair_strategy(INVALID_ENUM_VALUE, move |record, violation| {
            write_schema_default(&schema, record, violation)
        });

        let schema = Arc::clone(&self.schema);
        self.add_repair_strategy(INVALID_VALUE_RANGE, move |record, violation| {
            let field = require_field(violation)?;
            let repaired_value = if field == ESTIMATED_TOKENS_FIELD {
                let tokens = estimate_tokens(record)
                    .ok_or("cannot recompute token estimate without content")?;
                json!(tokens)
            } else {
                let rule = schema
                    .field(field)
                    .ok_or_else(|| format!("no schema rule for `{field}`"))?;
                let current = get_path(record, field)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| format!("`{field}` is not numeric"))?;
                let clamped = rule.clamp(current);
                if clamped.fract() == 0.0 && get_path(record, field).is_some_and(Value::is_i64) {
                    json!(clamped as i64)
                } else {
                    json!(clamped)
                }
            };
            write_field(record, field, repaired_value)
        });

        self.add_repair_strategy(TOKEN_ESTIMATE_MISMATCH, |record, _| {
            let tokens =
                estimate_tokens(record).ok_or("cannot recompute token estimate without content")?;
            write_field(record, ESTIMATED_TOKENS_FIELD, json!(tokens))
        });

        self.add_repair_strategy(DIFFICULTY_MISMATCH, |record, _| {
            let difficulty =
                computed_difficulty(record).ok_or("cannot compute difficulty without content")?;
            write_field(record, DIFFICULTY_FIELD, json!(difficulty))
        });
    }
}

fn check_references(record: &Value, ctx: &ValidationContext) -> Vec<IntegrityViolation> {
    let mut out = Vec::new();

    if let Some(parent) = record.get(PARENT_FIELD).and_then(Value::as_str) {
        if !ctx.existing_ids.contains(parent) {
            out.push(
                IntegrityViolation::new(
                    MISSING_REFERENCE,
                    Severity::Error,
                    format!("referenced parent `{parent}` does not exist"),
                )
                .with_field(PARENT_FIELD),
            );
        }
    }

    if let Some(references) = record.get(REFERENCES_FIELD).and_then(Value::as_array) {
        for reference in references.iter().filter_map(Value::as_str) {
            if !ctx.existing_ids.contains(reference) {
                out.push(
                    IntegrityViolation::new(
                        MISSING_REFERENCE,
                        Severity::Error,
                        format!("referenced record `{reference}` does not exist"),
                    )
                    .with_field(REFERENCES_FIELD),
                );
            }
        }
    }

    out
}

fn field_snapshot(record: &Value, violation: &IntegrityViolation) -> Option<Value> {
    violation
        .field
        .as_deref()
        .and_then(|field| get_path(record, field))
        .cloned()
}

fn require_field(violation: &IntegrityViolation) -> std::result::Result<&str, String> {
    violation
        .field
        .as_deref()
        .ok_or_else(|| format!("`{}` violation has no field", violation.rule_id))
}

fn write_field(record: &Value, field: &str, value: Value) -> RepairOutcome {
    let mut repaired = record.clone();
    if set_path(&mut repaired, field, value) {
        Ok(repaired)
    } else {
        Err(format!("cannot write `{field}`: parent is not an object"))
    }
}

fn write_schema_default(
    schema: &RecordSchema,
    record: &Value,
    violation: &IntegrityViolation,
) -> RepairOutcome {
    let field = require_field(violation)?;
    let default = schema
        .field(field)
        .and_then(|rule| rule.default.clone())
        .ok_or_else(|| format!("no default declared for `{field}`"))?;
    write_field(record, field, default)
}

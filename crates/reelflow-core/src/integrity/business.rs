//! Business-logic checks on prompt records.
//!
//! Declared metadata (token estimate, difficulty) is recomputed from the
//! record's content; a deviation is a `warning`, never a blocking error.

use serde_json::{json, Value};

use crate::integrity::model::{IntegrityViolation, Severity};
use crate::record::get_path;

pub const TOKEN_ESTIMATE_MISMATCH: &str = "TOKEN_ESTIMATE_MISMATCH";
pub const DIFFICULTY_MISMATCH: &str = "DIFFICULTY_MISMATCH";

pub const ESTIMATED_TOKENS_FIELD: &str = "metadata.estimatedTokens";
pub const DIFFICULTY_FIELD: &str = "metadata.difficulty";

/// Relative deviation above which a declared estimate is flagged.
pub const TOKEN_DEVIATION_THRESHOLD: f64 = 0.5;

const CHARS_PER_TOKEN: usize = 4;
const INTERMEDIATE_TOKENS: u64 = 200;
const ADVANCED_TOKENS: u64 = 800;

/// Recompute a token estimate from `content`, falling back to the serialized
/// `structure`. `None` when the record carries neither.
pub fn estimate_tokens(record: &Value) -> Option<u64> {
    let text = match (record.get("content"), record.get("structure")) {
        (Some(Value::String(content)), _) => content.clone(),
        (_, Some(structure)) if !structure.is_null() => structure.to_string(),
        _ => return None,
    };
    let chars = text.chars().count();
    Some(chars.div_ceil(CHARS_PER_TOKEN).max(1) as u64)
}

/// Difficulty implied by the size of the prompt and its variable count.
pub fn computed_difficulty(record: &Value) -> Option<&'static str> {
    let tokens = estimate_tokens(record)?;
    let variables = record
        .get("variables")
        .and_then(Value::as_array)
        .map_or(0, Vec::len) as u64;
    let weighted = tokens + variables * 50;
    Some(if weighted >= ADVANCED_TOKENS {
        "advanced"
    } else if weighted >= INTERMEDIATE_TOKENS {
        "intermediate"
    } else {
        "beginner"
    })
}

/// Run all business-logic checks.
pub fn check_business_rules(record: &Value) -> Vec<IntegrityViolation> {
    let mut out = Vec::new();

    let declared = get_path(record, ESTIMATED_TOKENS_FIELD).and_then(Value::as_f64);
    if let (Some(declared), Some(actual)) = (declared, estimate_tokens(record)) {
        // Non-positive estimates are a range violation, reported by the schema.
        if declared > 0.0 {
            let actual = actual as f64;
            let deviation = (declared - actual).abs() / actual;
            if deviation > TOKEN_DEVIATION_THRESHOLD {
                out.push(
                    IntegrityViolation::new(
                        TOKEN_ESTIMATE_MISMATCH,
                        Severity::Warning,
                        format!(
                            "declared token estimate {declared} deviates {:.0}% from computed {actual}",
                            deviation * 100.0
                        ),
                    )
                    .with_field(ESTIMATED_TOKENS_FIELD)
                    .repairable(true)
                    .with_details(json!({ "declared": declared, "actual": actual })),
                );
            }
        }
    }

    let declared = get_path(record, DIFFICULTY_FIELD).and_then(Value::as_str);
    if let (Some(declared), Some(computed)) = (declared, computed_difficulty(record)) {
        if declared != computed {
            out.push(
                IntegrityViolation::new(
                    DIFFICULTY_MISMATCH,
                    Severity::Warning,
                    format!("declared difficulty `{declared}` does not match computed `{computed}`"),
                )
                .with_field(DIFFICULTY_FIELD)
                .repairable(true),
            );
        }
    }

    out
}

//! Integration tests for record validation, repair and batch validation.

use reelflow_core::integrity::{
    BatchValidationOptions, FnRule, IntegrityValidator, RuleOutcome, Severity,
    ValidationContext, DUPLICATE_IDS, INVALID_VALUE_RANGE, MISSING_REFERENCE,
};
use serde_json::{json, Value};

fn prompt(id: &str) -> Value {
    json!({
        "id": id,
        "name": "Interview opener",
        "version": "1.0.0",
        "category": "shooting",
        "content": "Write an opening question for a founder interview.",
        "metadata": { "estimatedTokens": 13, "difficulty": "beginner" }
    })
}

/// Test: a negative token estimate is repaired to a positive recomputed value
#[tokio::test]
async fn test_negative_estimate_is_repaired() {
    let mut record = prompt("p1");
    record["metadata"]["estimatedTokens"] = json!(-50);

    let validator = IntegrityValidator::new();
    let plain = validator.validate(&record, &ValidationContext::default());
    assert!(!plain.is_valid);
    assert!(plain.has_violation(INVALID_VALUE_RANGE));

    let repaired = validator.validate(&record, &ValidationContext::default().with_auto_repair());
    assert!(repaired.is_valid, "repair should clear the range violation");
    assert!(!repaired.has_violation(INVALID_VALUE_RANGE));

    let report = repaired.repair.expect("repair report");
    let estimate = report.repaired_data["metadata"]["estimatedTokens"]
        .as_i64()
        .expect("numeric estimate");
    assert!(estimate > 0);
    assert_eq!(report.failed_count(), 0);
    assert!(repaired.quality_score > plain.quality_score);
}

/// Test: duplicate ids produce exactly one aggregate violation per id
#[tokio::test]
async fn test_duplicate_ids_in_batch() {
    let items = vec![prompt("A"), prompt("A"), prompt("B")];
    let result = IntegrityValidator::new()
        .validate_batch(items, &BatchValidationOptions::default())
        .await;

    let duplicates: Vec<_> = result
        .global_violations
        .iter()
        .filter(|v| v.rule_id == DUPLICATE_IDS)
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].details, Some(json!({ "id": "A", "count": 2 })));
    assert_eq!(result.total_items, 3);
    assert_eq!(result.valid_items, 3);
}

/// Test: custom rule severities route to violations or warnings
#[tokio::test]
async fn test_custom_rules_and_references() {
    let mut validator = IntegrityValidator::new();
    validator.add_custom_rule(
        FnRule::new("NEEDS_TAGS", Severity::Warning, |record, _| {
            if record.get("tags").is_some() {
                RuleOutcome::pass()
            } else {
                RuleOutcome::fail("shooting prompts should be tagged").at("tags")
            }
        })
        .with_condition(|record, _| record["category"] == "shooting"),
    );

    let mut child = prompt("child");
    child["parentId"] = json!("missing-parent");
    let ctx = ValidationContext::default().with_existing(&[prompt("other")]);

    let result = validator.validate(&child, &ctx);
    assert!(!result.is_valid);
    assert!(result.has_violation(MISSING_REFERENCE));
    assert!(result.warnings.iter().any(|w| w.rule_id == "NEEDS_TAGS"));

    let ok = validator.validate(&prompt("solo"), &ValidationContext::default());
    assert!(ok.is_valid);
    assert_eq!(ok.warnings.len(), 1);
}

/// Test: parallel batch with repairs yields the same aggregate as sequential
#[tokio::test]
async fn test_parallel_batch_with_repair() {
    let mut items: Vec<Value> = (0..10).map(|i| prompt(&format!("p{i}"))).collect();
    items[4]["metadata"]["estimatedTokens"] = json!(-50);
    items[7]["metadata"]["estimatedTokens"] = json!(-1);

    let options = BatchValidationOptions {
        parallel_processing: true,
        batch_size: 4,
        context: ValidationContext::default().with_auto_repair(),
        ..Default::default()
    };
    let result = IntegrityValidator::new().validate_batch(items, &options).await;
    assert!(result.success);
    assert_eq!(result.processed_items, 10);
    assert_eq!(result.valid_items, 10);
    assert_eq!(result.repaired_items, 2);
    let indices: Vec<usize> = result.results.iter().map(|r| r.index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
}

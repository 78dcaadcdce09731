//! Batch validation with duplicate detection and chunked processing.

use std::collections::HashMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::integrity::model::{IntegrityCheckResult, IntegrityViolation, Severity, ValidationContext};
use crate::integrity::validator::IntegrityValidator;
use crate::obs::emit_batch_validated;
use crate::record::record_id;

pub const DUPLICATE_IDS: &str = "DUPLICATE_IDS";
pub const VALIDATION_ABORTED: &str = "VALIDATION_ABORTED";

/// Options for [`IntegrityValidator::validate_batch`].
#[derive(Debug, Clone)]
pub struct BatchValidationOptions {
    /// Validate the items of each chunk concurrently.
    pub parallel_processing: bool,
    /// Items per chunk; `0` is treated as `1`.
    pub batch_size: usize,
    /// Report success when at least one item is valid.
    pub allow_partial_success: bool,
    /// Stop once an item fails validation.
    pub stop_on_first_error: bool,
    /// Context applied to every item.
    pub context: ValidationContext,
}

impl Default for BatchValidationOptions {
    fn default() -> Self {
        Self {
            parallel_processing: false,
            batch_size: 50,
            allow_partial_success: true,
            stop_on_first_error: false,
            context: ValidationContext::default(),
        }
    }
}

/// Validation outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemValidation {
    pub index: usize,
    pub id: Option<String>,
    pub result: IntegrityCheckResult,
}

/// Aggregate outcome of a batch validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchIntegrityResult {
    pub success: bool,
    pub total_items: usize,
    pub processed_items: usize,
    pub valid_items: usize,
    pub invalid_items: usize,
    pub repaired_items: usize,
    pub failed_repairs: usize,
    pub average_quality_score: f64,
    /// Findings that concern the batch as a whole, e.g. duplicate ids.
    pub global_violations: Vec<IntegrityViolation>,
    pub results: Vec<ItemValidation>,
    /// Set when `stop_on_first_error` cut the batch short.
    pub stopped_early: bool,
}

/// Counters for one chunk, merged into the batch total once the chunk is done.
#[derive(Debug, Default)]
struct ChunkTally {
    valid: usize,
    invalid: usize,
    repaired: usize,
    failed_repairs: usize,
    score_sum: f64,
}

impl ChunkTally {
    fn record(&mut self, result: &IntegrityCheckResult) {
        if result.is_valid {
            self.valid += 1;
        } else {
            self.invalid += 1;
        }
        if result.was_repaired() {
            self.repaired += 1;
        }
        self.failed_repairs += result.repair.as_ref().map_or(0, |r| r.failed_count());
        self.score_sum += result.quality_score;
    }

    fn merge(&mut self, other: ChunkTally) {
        self.valid += other.valid;
        self.invalid += other.invalid;
        self.repaired += other.repaired;
        self.failed_repairs += other.failed_repairs;
        self.score_sum += other.score_sum;
    }
}

/// One aggregate violation per identifier that occurs more than once.
pub fn find_duplicate_ids(items: &[Value]) -> Vec<IntegrityViolation> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in items.iter().filter_map(record_id) {
        let count = counts.entry(id).or_insert(0);
        if *count == 0 {
            order.push(id);
        }
        *count += 1;
    }

    order
        .into_iter()
        .filter_map(|id| {
            let count = counts[id];
            (count > 1).then(|| {
                IntegrityViolation::new(
                    DUPLICATE_IDS,
                    Severity::Error,
                    format!("id `{id}` appears {count} times in the batch"),
                )
                .with_field("id")
                .with_details(json!({ "id": id, "count": count }))
            })
        })
        .collect()
}

impl IntegrityValidator {
    /// Validate a batch of records.
    ///
    /// Duplicate identifiers are reported once per id before any item is
    /// validated. Items are processed in chunks of `batch_size`; with
    /// `parallel_processing` the items of a chunk run concurrently on the
    /// blocking pool. Per-chunk tallies are merged after each chunk.
    pub async fn validate_batch(
        &self,
        items: Vec<Value>,
        options: &BatchValidationOptions,
    ) -> BatchIntegrityResult {
        let total_items = items.len();
        let global_violations = find_duplicate_ids(&items);
        if !global_violations.is_empty() {
            warn!(
                duplicates = global_violations.len(),
                "batch contains duplicate ids"
            );
        }

        let chunk_size = options.batch_size.max(1);
        let mut tally = ChunkTally::default();
        let mut results: Vec<ItemValidation> = Vec::with_capacity(total_items);
        let mut stopped_early = false;

        let indexed: Vec<(usize, Value)> = items.into_iter().enumerate().collect();
        for chunk in indexed.chunks(chunk_size) {
            let mut chunk_results = if options.parallel_processing {
                self.validate_chunk_parallel(chunk, &options.context).await
            } else {
                chunk
                    .iter()
                    .map(|(index, item)| ItemValidation {
                        index: *index,
                        id: record_id(item).map(str::to_string),
                        result: self.validate(item, &options.context),
                    })
                    .collect()
            };

            if options.stop_on_first_error {
                if let Some(first_bad) = chunk_results.iter().position(|r| !r.result.is_valid) {
                    chunk_results.truncate(first_bad + 1);
                    stopped_early = true;
                }
            }

            let mut chunk_tally = ChunkTally::default();
            for item in &chunk_results {
                chunk_tally.record(&item.result);
            }
            tally.merge(chunk_tally);
            results.extend(chunk_results);

            if stopped_early {
                break;
            }
            tokio::task::yield_now().await;
        }

        let processed_items = results.len();
        let success = if options.allow_partial_success {
            total_items == 0 || tally.valid > 0
        } else {
            tally.invalid == 0 && global_violations.is_empty() && !stopped_early
        };
        let average_quality_score = if processed_items == 0 {
            1.0
        } else {
            tally.score_sum / processed_items as f64
        };

        emit_batch_validated(total_items, tally.valid, tally.invalid, tally.repaired);
        info!(
            total = total_items,
            processed = processed_items,
            valid = tally.valid,
            invalid = tally.invalid,
            stopped_early,
            "batch validation finished"
        );

        BatchIntegrityResult {
            success,
            total_items,
            processed_items,
            valid_items: tally.valid,
            invalid_items: tally.invalid,
            repaired_items: tally.repaired,
            failed_repairs: tally.failed_repairs,
            average_quality_score,
            global_violations,
            results,
            stopped_early,
        }
    }

    async fn validate_chunk_parallel(
        &self,
        chunk: &[(usize, Value)],
        context: &ValidationContext,
    ) -> Vec<ItemValidation> {
        let tasks = chunk.iter().map(|(index, item)| {
            let validator = self.clone();
            let context = context.clone();
            let item = item.clone();
            let index = *index;
            async move {
                let id = record_id(&item).map(str::to_string);
                let result =
                    tokio::task::spawn_blocking(move || validator.validate(&item, &context))
                        .await
                        .unwrap_or_else(|e| {
                            IntegrityCheckResult::from_findings(
                                vec![IntegrityViolation::new(
                                    VALIDATION_ABORTED,
                                    Severity::Critical,
                                    format!("validation task failed: {e}"),
                                )],
                                Vec::new(),
                                None,
                            )
                        });
                ItemValidation { index, id, result }
            }
        });
        join_all(tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Shot list",
            "version": "1.0.0",
            "content": "Draft a shot list for a two-minute brand film.",
            "metadata": { "estimatedTokens": 12 }
        })
    }

    #[test]
    fn test_duplicate_ids_reported_once_per_id() {
        let items = vec![prompt("A"), prompt("A"), prompt("B")];
        let duplicates = find_duplicate_ids(&items);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].rule_id, DUPLICATE_IDS);
        assert_eq!(
            duplicates[0].details,
            Some(json!({ "id": "A", "count": 2 }))
        );
    }

    #[tokio::test]
    async fn test_batch_counts_valid_and_invalid() {
        let mut bad = prompt("C");
        bad.as_object_mut().unwrap().remove("content");
        let items = vec![prompt("A"), bad, prompt("B")];

        let result = IntegrityValidator::new()
            .validate_batch(items, &BatchValidationOptions::default())
            .await;
        assert_eq!(result.total_items, 3);
        assert_eq!(result.processed_items, 3);
        assert_eq!(result.valid_items, 2);
        assert_eq!(result.invalid_items, 1);
        assert!(result.success);
        assert!(!result.stopped_early);
    }

    #[tokio::test]
    async fn test_stop_on_first_error() {
        let mut bad = prompt("B");
        bad["version"] = json!("not-a-version");
        let items = vec![prompt("A"), bad, prompt("C"), prompt("D")];

        let options = BatchValidationOptions {
            stop_on_first_error: true,
            allow_partial_success: false,
            batch_size: 1,
            ..Default::default()
        };
        let result = IntegrityValidator::new().validate_batch(items, &options).await;
        assert!(result.stopped_early);
        assert_eq!(result.processed_items, 2);
        assert_eq!(result.invalid_items, 1);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let mut repairable = prompt("R");
        repairable["metadata"]["estimatedTokens"] = json!(-50);
        let items: Vec<Value> = (0..7)
            .map(|i| prompt(&format!("p{i}")))
            .chain(std::iter::once(repairable))
            .collect();

        let context = ValidationContext::default().with_auto_repair();
        let sequential = BatchValidationOptions {
            batch_size: 3,
            context: context.clone(),
            ..Default::default()
        };
        let parallel = BatchValidationOptions {
            parallel_processing: true,
            ..sequential.clone()
        };

        let validator = IntegrityValidator::new();
        let a = validator.validate_batch(items.clone(), &sequential).await;
        let b = validator.validate_batch(items, &parallel).await;
        assert_eq!(a, b);
        assert_eq!(a.repaired_items, 1);
        assert_eq!(a.valid_items, 8);
    }

    #[tokio::test]
    async fn test_strict_batch_fails_on_duplicates() {
        let options = BatchValidationOptions {
            allow_partial_success: false,
            ..Default::default()
        };
        let result = IntegrityValidator::new()
            .validate_batch(vec![prompt("A"), prompt("A")], &options)
            .await;
        assert_eq!(result.valid_items, 2);
        assert_eq!(result.global_violations.len(), 1);
        assert!(!result.success);
    }
}

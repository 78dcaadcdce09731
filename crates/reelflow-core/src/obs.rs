//! Structured lifecycle events for pipeline runs, plans and record batches.
//!
//! Every emitter logs at `info!` (SLA breaches at `warn!`) with an `event`
//! field so log aggregation can filter on it.

use tracing::{info, warn};

/// RAII guard that keeps a run-scoped span entered for the life of a run.
///
/// ```ignore
/// let _span = PipelineSpan::enter("ingest", "4f1c...");
/// // tracing calls now carry pipeline_id and execution_id
/// ```
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    pub fn enter(pipeline_id: &str, execution_id: &str) -> Self {
        let span = tracing::info_span!(
            "reelflow.pipeline",
            pipeline_id = %pipeline_id,
            execution_id = %execution_id
        );
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_pipeline_started(pipeline_id: &str, execution_id: &str, stages: usize) {
    info!(
        event = "pipeline.started",
        pipeline_id = %pipeline_id,
        execution_id = %execution_id,
        stages = stages,
    );
}

/// One stage reached a terminal status.
pub fn emit_stage_finished(pipeline_id: &str, stage: &str, status: &str, duration_ms: u64) {
    info!(
        event = "stage.finished",
        pipeline_id = %pipeline_id,
        stage = %stage,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_pipeline_finished(
    pipeline_id: &str,
    execution_id: &str,
    status: &str,
    duration_ms: u64,
    success: bool,
) {
    info!(
        event = "pipeline.finished",
        pipeline_id = %pipeline_id,
        execution_id = %execution_id,
        status = %status,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_sla_violation(pipeline_id: &str, kind: &str, expected: f64, actual: f64, severity: &str) {
    warn!(
        event = "sla.violated",
        pipeline_id = %pipeline_id,
        kind = %kind,
        expected = expected,
        actual = actual,
        severity = %severity,
    );
}

/// Execution plan built over `pipelines` declarations.
pub fn emit_plan_created(pipelines: usize, groups: usize) {
    info!(event = "plan.created", pipelines = pipelines, groups = groups);
}

pub fn emit_batch_validated(total: usize, valid: usize, invalid: usize, repaired: usize) {
    info!(
        event = "batch.validated",
        total = total,
        valid = valid,
        invalid = invalid,
        repaired = repaired,
    );
}

pub fn emit_conflicts_resolved(detected: usize, applied: usize, failed: usize, skipped: usize) {
    info!(
        event = "conflicts.resolved",
        detected = detected,
        applied = applied,
        failed = failed,
        skipped = skipped,
    );
}

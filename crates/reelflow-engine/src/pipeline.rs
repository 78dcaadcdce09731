//! Sequential pipeline execution with SLA evaluation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reelflow_core::obs::{
    emit_pipeline_finished, emit_pipeline_started, emit_sla_violation, emit_stage_finished,
    PipelineSpan,
};
use reelflow_core::RecordCount;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::runner::StageRunner;
use crate::sla::{builtin_violations, SlaCheck, SlaConfig, SlaContext, SlaViolation};
use crate::stage::{PipelineStageConfig, StageResult, StageStatus};

/// A pipeline: ordered stages plus service-level objectives.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub id: String,
    pub version: String,
    /// Execution order.
    pub stages: Vec<PipelineStageConfig>,
    pub sla: SlaConfig,
}

impl PipelineConfig {
    pub fn new(id: impl Into<String>, stages: Vec<PipelineStageConfig>) -> Self {
        Self {
            id: id.into(),
            version: "1.0.0".to_string(),
            stages,
            sla: SlaConfig::default(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_sla(mut self, sla: SlaConfig) -> Self {
        self.sla = sla;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// Per-run report. One entry per configured stage, in stage order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    pub stages: Vec<StageResult>,
    pub sla_violations: Vec<SlaViolation>,
}

impl ExecutionReport {
    pub fn completed_count(&self) -> usize {
        self.count(StageStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(StageStatus::Failed)
    }

    /// Failed stages over stages that were not skipped; `0.0` when none
    /// qualify.
    pub fn error_rate(&self) -> f64 {
        let eligible = self
            .stages
            .iter()
            .filter(|s| s.status != StageStatus::Skipped)
            .count();
        if eligible == 0 {
            0.0
        } else {
            self.failed_count() as f64 / eligible as f64
        }
    }

    pub fn stage(&self, id: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage_id == id)
    }

    pub fn has_critical_violation(&self) -> bool {
        self.sla_violations.iter().any(SlaViolation::is_critical)
    }

    fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecutionResult {
    pub execution_id: String,
    pub pipeline_id: String,
    pub pipeline_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// `true` iff no stage failed, no critical violation, not cancelled.
    pub success: bool,
    /// Data produced by the last stage that ran.
    pub output: Option<Value>,
    pub report: ExecutionReport,
}

impl PipelineExecutionResult {
    /// First failed stage's error text.
    pub fn first_error(&self) -> Option<&str> {
        self.report
            .stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
            .and_then(|s| s.error.as_deref())
    }
}

/// Engine-wide behaviour switches.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Abort a handler's task when its stage times out. When `false` the
    /// task keeps running detached and its result is discarded.
    pub abort_on_timeout: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            abort_on_timeout: true,
        }
    }
}

/// Sender half of a run cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Checked by the engine before each stage starts.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, signal) = Self::new();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Executes pipelines stage by stage.
///
/// Cheap to clone; custom SLA checks are shared between clones.
#[derive(Clone, Default)]
pub struct PipelineEngine {
    options: EngineOptions,
    checks: Vec<Arc<dyn SlaCheck>>,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let checks: Vec<&str> = self.checks.iter().map(|c| c.name()).collect();
        f.debug_struct("PipelineEngine")
            .field("options", &self.options)
            .field("checks", &checks)
            .finish()
    }
}

impl PipelineEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            checks: Vec::new(),
        }
    }

    /// Add an objective evaluated after the built-in ones.
    pub fn add_sla_check<C>(&mut self, check: C)
    where
        C: SlaCheck + 'static,
    {
        self.checks.push(Arc::new(check));
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub async fn execute(&self, config: &PipelineConfig) -> PipelineExecutionResult {
        self.execute_with_cancel(config, &CancelSignal::never()).await
    }

    /// Run `config`'s stages in order, each receiving the previous output.
    ///
    /// The first failing stage ends the run; later stages stay `pending`.
    /// When `cancel` fires, the run stops before the next stage and the
    /// unstarted stages are marked `skipped`.
    #[instrument(skip(self, config, cancel), fields(pipeline_id = %config.id))]
    pub async fn execute_with_cancel(
        &self,
        config: &PipelineConfig,
        cancel: &CancelSignal,
    ) -> PipelineExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        emit_pipeline_started(&config.id, &execution_id, config.stages.len());

        let mut stages: Vec<StageResult> = config.stages.iter().map(StageResult::pending).collect();
        let mut carried: Option<Value> = None;
        let mut failed = false;
        let mut cancelled = false;

        for (index, stage) in config.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(stage = %stage.id, "run cancelled");
                for result in &mut stages[index..] {
                    result.status = StageStatus::Skipped;
                }
                cancelled = true;
                break;
            }

            if !stage.enabled {
                stages[index].status = StageStatus::Skipped;
                emit_stage_finished(&config.id, &stage.id, StageStatus::Skipped.name(), 0);
                continue;
            }

            stages[index].status = StageStatus::Running;
            let budget = stage.timeout.unwrap_or(config.sla.max_execution_time);
            let run = StageRunner::execute_stage(
                stage,
                carried.clone(),
                budget,
                self.options.abort_on_timeout,
            )
            .await;

            let result = &mut stages[index];
            result.execution_time_ms = run.duration_ms;
            match run.outcome {
                Ok(output) => {
                    result.status = StageStatus::Completed;
                    result.records_processed = output.data.record_count();
                    carried = Some(output.data);
                }
                Err(e) => {
                    result.status = StageStatus::Failed;
                    result.error = Some(e.to_string());
                    failed = true;
                }
            }
            emit_stage_finished(&config.id, &stage.id, result.status.name(), run.duration_ms);
            if failed {
                break;
            }
        }

        // No awaits below: the entered span must not cross one.
        let _span = PipelineSpan::enter(&config.id, &execution_id);
        let elapsed = start.elapsed();
        let mut report = ExecutionReport {
            status: ExecutionStatus::Running,
            stages,
            sla_violations: Vec::new(),
        };
        report.sla_violations = self.evaluate_sla(config, &report, elapsed, carried.as_ref());
        for v in &report.sla_violations {
            emit_sla_violation(
                &config.id,
                &v.violation_type,
                v.expected,
                v.actual,
                v.severity.name(),
            );
        }

        report.status = if cancelled {
            ExecutionStatus::Cancelled
        } else if failed || report.has_critical_violation() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        let success = report.status == ExecutionStatus::Completed;
        let duration_ms = duration_ms(elapsed);
        emit_pipeline_finished(
            &config.id,
            &execution_id,
            report.status.name(),
            duration_ms,
            success,
        );

        PipelineExecutionResult {
            execution_id,
            pipeline_id: config.id.clone(),
            pipeline_version: config.version.clone(),
            started_at,
            completed_at: Some(Utc::now()),
            duration_ms,
            success,
            output: carried,
            report,
        }
    }

    fn evaluate_sla(
        &self,
        config: &PipelineConfig,
        report: &ExecutionReport,
        elapsed: Duration,
        output: Option<&Value>,
    ) -> Vec<SlaViolation> {
        let ctx = SlaContext {
            sla: &config.sla,
            report,
            elapsed,
            output,
        };
        let mut violations = builtin_violations(&ctx);
        violations.extend(self.checks.iter().filter_map(|c| c.evaluate(&ctx)));
        violations
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

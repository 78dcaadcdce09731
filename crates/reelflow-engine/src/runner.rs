//! Single-stage execution under a timeout.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::stage::{PipelineStageConfig, StageOutput};

/// Outcome of one stage invocation.
#[derive(Debug)]
pub struct StageRun {
    pub outcome: Result<StageOutput, StageError>,
    pub duration_ms: u64,
}

/// Runs a stage handler as its own task, raced against a budget.
pub struct StageRunner;

impl StageRunner {
    /// Execute `stage` with `input`.
    ///
    /// The handler runs on a spawned task. When `budget` elapses first the
    /// stage fails with [`StageError::Timeout`]; the task is aborted if
    /// `abort_on_timeout` is set and otherwise left to finish unobserved.
    /// A panicking handler fails the stage.
    pub async fn execute_stage(
        stage: &PipelineStageConfig,
        input: Option<Value>,
        budget: Duration,
        abort_on_timeout: bool,
    ) -> StageRun {
        let start = Instant::now();
        let handler = Arc::clone(&stage.handler);
        let mut task = tokio::spawn(async move { handler.handle(input).await });

        let outcome = match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(Ok(output))) if output.success => Ok(output),
            Ok(Ok(Ok(output))) => Err(StageError::Failed {
                stage: stage.id.clone(),
                reason: output
                    .error
                    .unwrap_or_else(|| "handler reported failure".to_string()),
            }),
            Ok(Ok(Err(e))) => Err(StageError::Failed {
                stage: stage.id.clone(),
                reason: format!("{e:#}"),
            }),
            Ok(Err(join_err)) if join_err.is_panic() => Err(StageError::Panicked {
                stage: stage.id.clone(),
                message: panic_message(join_err.into_panic()),
            }),
            Ok(Err(_)) => Err(StageError::Aborted {
                stage: stage.id.clone(),
            }),
            Err(_) => {
                if abort_on_timeout {
                    task.abort();
                } else {
                    debug!(stage = %stage.id, "timed out handler left running");
                }
                Err(StageError::Timeout {
                    stage: stage.id.clone(),
                    timeout_ms: budget.as_millis() as u64,
                })
            }
        };

        if let Err(e) = &outcome {
            warn!(stage = %stage.id, error = %e, "stage failed");
        }
        StageRun {
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

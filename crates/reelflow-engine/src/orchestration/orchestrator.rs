//! Drives registered pipelines through an execution plan.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use reelflow_core::obs::emit_plan_created;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::orchestration::error::OrchestrationResult;
use crate::orchestration::graph::{self, ExecutionPlan, PipelineDeclaration};
use crate::pipeline::{PipelineConfig, PipelineEngine, PipelineExecutionResult};

/// Outcome of running several pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    /// `true` iff `errors` is empty.
    pub success: bool,
    pub results: BTreeMap<String, PipelineExecutionResult>,
    /// Failure text keyed by pipeline id.
    pub errors: BTreeMap<String, String>,
    pub duration_ms: u64,
}

impl OrchestrationReport {
    fn from_outcomes(
        outcomes: Vec<(String, Result<PipelineExecutionResult, String>)>,
        start: Instant,
    ) -> Self {
        let mut results = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    if !result.success {
                        errors.insert(id.clone(), failure_text(&result));
                    }
                    results.insert(id, result);
                }
                Err(e) => {
                    errors.insert(id, e);
                }
            }
        }
        Self {
            success: errors.is_empty(),
            results,
            errors,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn failure_text(result: &PipelineExecutionResult) -> String {
    if let Some(error) = result.first_error() {
        return error.to_string();
    }
    let critical: Vec<&str> = result
        .report
        .sla_violations
        .iter()
        .filter(|v| v.is_critical())
        .map(|v| v.violation_type.as_str())
        .collect();
    if critical.is_empty() {
        format!("pipeline {}", result.report.status.name())
    } else {
        format!("critical SLA violation: {}", critical.join(", "))
    }
}

/// Plans and runs pipelines registered with it.
#[derive(Debug, Clone, Default)]
pub struct PipelineOrchestrator {
    engine: PipelineEngine,
    pipelines: HashMap<String, PipelineConfig>,
}

impl PipelineOrchestrator {
    pub fn new(engine: PipelineEngine) -> Self {
        Self {
            engine,
            pipelines: HashMap::new(),
        }
    }

    /// Register (or replace) the config run for `config.id`.
    pub fn register_pipeline(&mut self, config: PipelineConfig) {
        self.pipelines.insert(config.id.clone(), config);
    }

    pub fn register_all(&mut self, configs: impl IntoIterator<Item = PipelineConfig>) {
        for config in configs {
            self.register_pipeline(config);
        }
    }

    pub fn pipeline(&self, id: &str) -> Option<&PipelineConfig> {
        self.pipelines.get(id)
    }

    pub fn create_execution_plan(
        &self,
        declarations: &[PipelineDeclaration],
    ) -> OrchestrationResult<ExecutionPlan> {
        let plan = graph::create_execution_plan(declarations)?;
        emit_plan_created(plan.len(), plan.parallel_groups.len());
        Ok(plan)
    }

    /// Run the plan's pipelines one at a time in execution order.
    ///
    /// A failing pipeline is recorded and the walk continues.
    #[instrument(skip(self, plan), fields(pipelines = plan.len()))]
    pub async fn execute(&self, plan: &ExecutionPlan) -> OrchestrationReport {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(plan.len());
        for id in &plan.execution_order {
            outcomes.push((id.clone(), self.run_one(id).await));
        }
        self.finish(outcomes, start)
    }

    /// Run every declared pipeline concurrently, ignoring dependencies.
    #[instrument(skip(self, declarations), fields(pipelines = declarations.len()))]
    pub async fn execute_parallel(&self, declarations: &[PipelineDeclaration]) -> OrchestrationReport {
        let start = Instant::now();
        let runs = declarations.iter().map(|d| async move {
            (d.id.clone(), self.run_one(&d.id).await)
        });
        let outcomes = join_all(runs).await;
        self.finish(outcomes, start)
    }

    /// Run each parallel group concurrently, one group after another.
    #[instrument(skip(self, plan), fields(groups = plan.parallel_groups.len()))]
    pub async fn execute_staged(&self, plan: &ExecutionPlan) -> OrchestrationReport {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(plan.len());
        for group in &plan.parallel_groups {
            let runs = group
                .iter()
                .map(|id| async move { (id.clone(), self.run_one(id).await) });
            outcomes.extend(join_all(runs).await);
        }
        self.finish(outcomes, start)
    }

    async fn run_one(&self, id: &str) -> Result<PipelineExecutionResult, String> {
        let Some(config) = self.pipelines.get(id) else {
            warn!(pipeline_id = %id, "pipeline not registered");
            return Err(format!("pipeline `{id}` is not registered"));
        };
        Ok(self.engine.execute(config).await)
    }

    fn finish(
        &self,
        outcomes: Vec<(String, Result<PipelineExecutionResult, String>)>,
        start: Instant,
    ) -> OrchestrationReport {
        let report = OrchestrationReport::from_outcomes(outcomes, start);
        info!(
            pipelines = report.results.len(),
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "orchestration finished"
        );
        report
    }
}

//! Stage definitions and the handler contract.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a stage does. Informational; the engine treats all types alike.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Extract,
    Transform,
    Validate,
    Load,
    Analyze,
}

impl StageType {
    pub fn name(&self) -> &'static str {
        match self {
            StageType::Extract => "extract",
            StageType::Transform => "transform",
            StageType::Validate => "validate",
            StageType::Load => "load",
            StageType::Analyze => "analyze",
        }
    }
}

/// What a handler hands back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// The unit of work behind a stage.
///
/// Receives the previous stage's output data (`None` for the first stage).
/// Returning `Err` and returning `success: false` both fail the stage.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, input: Option<Value>) -> anyhow::Result<StageOutput>;
}

struct FnStage<F>(F);

#[async_trait]
impl<F, Fut> StageHandler for FnStage<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send + 'static,
{
    async fn handle(&self, input: Option<Value>) -> anyhow::Result<StageOutput> {
        (self.0)(input).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn fn_stage<F, Fut>(f: F) -> Arc<dyn StageHandler>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StageOutput>> + Send + 'static,
{
    Arc::new(FnStage(f))
}

/// One stage of a pipeline.
#[derive(Clone)]
pub struct PipelineStageConfig {
    pub id: String,
    pub name: String,
    pub stage_type: StageType,
    /// Schema identifiers, documentation only.
    pub input_schema: Option<String>,
    pub output_schema: Option<String>,
    /// Per-stage budget; falls back to the pipeline's max execution time.
    pub timeout: Option<Duration>,
    /// Disabled stages are skipped and pass their input through.
    pub enabled: bool,
    pub handler: Arc<dyn StageHandler>,
}

impl PipelineStageConfig {
    pub fn new(
        id: impl Into<String>,
        stage_type: StageType,
        handler: Arc<dyn StageHandler>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            stage_type,
            input_schema: None,
            output_schema: None,
            timeout: None,
            enabled: true,
            handler,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_schemas(mut self, input: Option<String>, output: Option<String>) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for PipelineStageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStageConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stage_type", &self.stage_type)
            .field("timeout", &self.timeout)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a stage within one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn name(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

/// Result of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub name: String,
    pub status: StageStatus,
    pub execution_time_ms: u64,
    pub records_processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    pub fn pending(stage: &PipelineStageConfig) -> Self {
        Self {
            stage_id: stage.id.clone(),
            name: stage.name.clone(),
            status: StageStatus::Pending,
            execution_time_ms: 0,
            records_processed: 0,
            error: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_type_names() {
        assert_eq!(StageType::Extract.name(), "extract");
        assert_eq!(StageType::Analyze.name(), "analyze");
        let parsed: StageType = serde_json::from_str("\"transform\"").unwrap();
        assert_eq!(parsed, StageType::Transform);
    }

    #[tokio::test]
    async fn test_fn_stage_passes_input() {
        let handler = fn_stage(|input| async move {
            let n = input.and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(StageOutput::ok(json!(n + 1)))
        });
        let out = handler.handle(Some(json!(41))).await.unwrap();
        assert!(out.success);
        assert_eq!(out.data, json!(42));
    }

    #[test]
    fn test_stage_config_builders() {
        let handler = fn_stage(|_| async { Ok(StageOutput::ok(Value::Null)) });
        let stage = PipelineStageConfig::new("extract", StageType::Extract, handler)
            .named("Extract footage metadata")
            .with_timeout(Duration::from_millis(500))
            .disabled();
        assert_eq!(stage.id, "extract");
        assert_eq!(stage.name, "Extract footage metadata");
        assert_eq!(stage.timeout, Some(Duration::from_millis(500)));
        assert!(!stage.enabled);

        let pending = StageResult::pending(&stage);
        assert_eq!(pending.status, StageStatus::Pending);
        assert!(!pending.passed());
    }
}

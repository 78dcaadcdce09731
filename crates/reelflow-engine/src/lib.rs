//! reelflow engine: staged pipeline execution under service-level
//! objectives, and dependency-ordered orchestration of many pipelines.

pub mod config;
pub mod error;
pub mod orchestration;
pub mod pipeline;
pub mod runner;
pub mod sla;
pub mod stage;

pub use config::{load_pipeline_set, HandlerRegistry, PipelineSetSpec, PipelineSpec};
pub use error::{ConfigError, ConfigResult, StageError};
pub use orchestration::{
    create_execution_plan, ExecutionPlan, OrchestrationError, OrchestrationReport,
    PipelineDeclaration, PipelineOrchestrator,
};
pub use pipeline::{
    CancelHandle, CancelSignal, EngineOptions, ExecutionReport, ExecutionStatus, PipelineConfig,
    PipelineEngine, PipelineExecutionResult,
};
pub use runner::{StageRun, StageRunner};
pub use sla::{QualityScoreCheck, SlaCheck, SlaConfig, SlaViolation, ViolationSeverity};
pub use stage::{
    fn_stage, PipelineStageConfig, StageHandler, StageOutput, StageResult, StageStatus, StageType,
};

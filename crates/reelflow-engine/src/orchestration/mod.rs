//! Multi-pipeline orchestration.
//!
//! - [`graph`]: duplicate, unknown-dependency and cycle checks; execution
//!   order and parallel groups
//! - [`orchestrator::PipelineOrchestrator`]: sequential, parallel and
//!   group-by-group execution of registered pipelines

pub mod error;
pub mod graph;
pub mod orchestrator;

pub use error::{OrchestrationError, OrchestrationResult};
pub use graph::{create_execution_plan, ExecutionPlan, PipelineDeclaration};
pub use orchestrator::{OrchestrationReport, PipelineOrchestrator};

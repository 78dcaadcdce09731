//! Error types for pipeline orchestration.

use thiserror::Error;

/// Structural problems found while planning. Nothing runs when one occurs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    /// The dependency graph contains a cycle through these pipelines.
    #[error("dependency cycle detected involving pipelines: {pipelines:?}")]
    DependencyCycle { pipelines: Vec<String> },

    #[error("pipeline `{pipeline}` depends on undeclared pipeline `{dependency}`")]
    UnknownDependency { pipeline: String, dependency: String },

    #[error("pipeline `{pipeline}` is declared more than once")]
    DuplicatePipeline { pipeline: String },
}

/// Convenience result alias.
pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_cycle_error_displays_pipeline_names() {
        let err = OrchestrationError::DependencyCycle {
            pipelines: vec!["ingest".to_string(), "publish".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ingest"));
        assert!(msg.contains("publish"));
    }

    #[test]
    fn test_unknown_dependency_displays_both_ids() {
        let err = OrchestrationError::UnknownDependency {
            pipeline: "publish".to_string(),
            dependency: "render".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("publish"));
        assert!(msg.contains("render"));
    }
}

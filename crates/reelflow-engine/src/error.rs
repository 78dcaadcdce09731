//! Error types for stage execution and pipeline configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Why a stage did not complete. Rendered into the stage result's error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("stage `{stage}` timed out after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    /// The handler returned an error or reported `success: false`.
    #[error("stage `{stage}` failed: {reason}")]
    Failed { stage: String, reason: String },

    #[error("stage `{stage}` panicked: {message}")]
    Panicked { stage: String, message: String },

    #[error("stage `{stage}` was cancelled before completing")]
    Aborted { stage: String },
}

impl StageError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors loading or binding pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON pipeline config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML pipeline config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Only `.json` and `.toml` files are understood.
    #[error("unsupported config format for {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("pipeline `{pipeline}` stage `{stage}` references unknown handler `{handler}`")]
    UnknownHandler {
        pipeline: String,
        stage: String,
        handler: String,
    },

    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_mentions_budget() {
        let err = StageError::Timeout {
            stage: "transcode".to_string(),
            timeout_ms: 250,
        };
        assert!(err.is_timeout());
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_unknown_handler_names_everything() {
        let err = ConfigError::UnknownHandler {
            pipeline: "ingest".to_string(),
            stage: "extract".to_string(),
            handler: "csv_reader".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ingest"));
        assert!(msg.contains("extract"));
        assert!(msg.contains("csv_reader"));
    }
}

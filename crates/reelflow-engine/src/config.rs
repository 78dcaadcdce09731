//! Serializable pipeline definitions and handler binding.
//!
//! Files name handlers as strings; [`HandlerRegistry`] maps those names to
//! the embedding application's [`StageHandler`]s. Durations are milliseconds.
//!
//! ```toml
//! [[pipelines]]
//! id = "ingest"
//!
//! [[pipelines.stages]]
//! id = "extract"
//! type = "extract"
//! handler = "read_footage_index"
//! timeout_ms = 5000
//!
//! [[pipelines]]
//! id = "publish"
//! depends_on = ["ingest"]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::orchestration::PipelineDeclaration;
use crate::pipeline::PipelineConfig;
use crate::sla::SlaConfig;
use crate::stage::{PipelineStageConfig, StageHandler, StageType};

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_max_execution_time_ms() -> u64 {
    300_000
}

fn default_max_error_rate() -> f64 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    /// Defaults to `id`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    /// Name looked up in the [`HandlerRegistry`].
    pub handler: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub input_schema: Option<String>,
    #[serde(default)]
    pub output_schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaSpec {
    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    #[serde(default)]
    pub required_quality_score: Option<f64>,
}

impl Default for SlaSpec {
    fn default() -> Self {
        Self {
            max_execution_time_ms: default_max_execution_time_ms(),
            max_error_rate: default_max_error_rate(),
            required_quality_score: None,
        }
    }
}

impl From<&SlaSpec> for SlaConfig {
    fn from(spec: &SlaSpec) -> Self {
        SlaConfig {
            max_execution_time: Duration::from_millis(spec.max_execution_time_ms),
            max_error_rate: spec.max_error_rate,
            required_quality_score: spec.required_quality_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub sla: SlaSpec,
}

impl PipelineSpec {
    /// Resolve handler names into a runnable config.
    pub fn bind(&self, registry: &HandlerRegistry) -> ConfigResult<PipelineConfig> {
        if !(0.0..=1.0).contains(&self.sla.max_error_rate) {
            return Err(ConfigError::Invalid(format!(
                "pipeline `{}`: max_error_rate must be within 0..=1",
                self.id
            )));
        }

        let stages = self
            .stages
            .iter()
            .map(|spec| {
                let handler =
                    registry
                        .get(&spec.handler)
                        .ok_or_else(|| ConfigError::UnknownHandler {
                            pipeline: self.id.clone(),
                            stage: spec.id.clone(),
                            handler: spec.handler.clone(),
                        })?;
                let mut stage = PipelineStageConfig::new(spec.id.clone(), spec.stage_type, handler)
                    .with_schemas(spec.input_schema.clone(), spec.output_schema.clone());
                if let Some(name) = &spec.name {
                    stage = stage.named(name.clone());
                }
                if let Some(ms) = spec.timeout_ms {
                    stage = stage.with_timeout(Duration::from_millis(ms));
                }
                if !spec.enabled {
                    stage = stage.disabled();
                }
                Ok(stage)
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(PipelineConfig {
            id: self.id.clone(),
            version: self.version.clone(),
            stages,
            sla: SlaConfig::from(&self.sla),
        })
    }
}

/// A pipeline plus the pipelines it waits for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEntry {
    #[serde(flatten)]
    pub pipeline: PipelineSpec,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSetSpec {
    #[serde(default)]
    pub pipelines: Vec<PipelineEntry>,
}

impl PipelineSetSpec {
    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_toml(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn declarations(&self) -> Vec<PipelineDeclaration> {
        self.pipelines
            .iter()
            .map(|e| PipelineDeclaration::new(e.pipeline.id.clone(), e.depends_on.iter().cloned()))
            .collect()
    }

    pub fn bind_all(&self, registry: &HandlerRegistry) -> ConfigResult<Vec<PipelineConfig>> {
        self.pipelines
            .iter()
            .map(|e| e.pipeline.bind(registry))
            .collect()
    }
}

/// Load a pipeline set from a `.json` or `.toml` file.
pub fn load_pipeline_set(path: &Path) -> ConfigResult<PipelineSetSpec> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let set = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => PipelineSetSpec::from_json(&raw)?,
        Some("toml") => PipelineSetSpec::from_toml(&raw)?,
        _ => {
            return Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };
    debug!(path = %path.display(), pipelines = set.pipelines.len(), "loaded pipeline set");
    Ok(set)
}

/// Named stage handlers supplied by the embedding application.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn StageHandler>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{fn_stage, StageOutput};
    use serde_json::json;

    const SET_TOML: &str = r#"
[[pipelines]]
id = "ingest"
version = "2.1.0"

[pipelines.sla]
max_execution_time_ms = 1000
max_error_rate = 0.0

[[pipelines.stages]]
id = "extract"
type = "extract"
handler = "noop"
timeout_ms = 250

[[pipelines.stages]]
id = "score"
name = "Score footage"
type = "analyze"
handler = "noop"
enabled = false

[[pipelines]]
id = "publish"
depends_on = ["ingest"]
"#;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new().with(
            "noop",
            fn_stage(|_| async { Ok(StageOutput::ok(json!([]))) }),
        )
    }

    #[test]
    fn test_toml_set_binds() {
        let set = PipelineSetSpec::from_toml(SET_TOML).unwrap();
        assert_eq!(set.pipelines.len(), 2);
        assert_eq!(
            set.declarations(),
            vec![
                PipelineDeclaration::root("ingest"),
                PipelineDeclaration::new("publish", ["ingest"]),
            ]
        );

        let configs = set.bind_all(&registry()).unwrap();
        let ingest = &configs[0];
        assert_eq!(ingest.version, "2.1.0");
        assert_eq!(ingest.sla.max_execution_time, Duration::from_millis(1000));
        assert_eq!(ingest.stages[0].timeout, Some(Duration::from_millis(250)));
        assert_eq!(ingest.stages[1].name, "Score footage");
        assert!(!ingest.stages[1].enabled);
        assert_eq!(configs[1].version, "1.0.0");
        assert_eq!(configs[1].sla.max_error_rate, 0.1);
    }

    #[test]
    fn test_unknown_handler() {
        let spec = PipelineSpec {
            id: "ingest".to_string(),
            version: default_version(),
            stages: vec![StageSpec {
                id: "extract".to_string(),
                name: None,
                stage_type: StageType::Extract,
                handler: "missing".to_string(),
                timeout_ms: None,
                enabled: true,
                input_schema: None,
                output_schema: None,
            }],
            sla: SlaSpec::default(),
        };
        let err = spec.bind(&registry()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownHandler { ref handler, .. } if handler == "missing"));
    }

    #[test]
    fn test_json_set_parses() {
        let raw = r#"{"pipelines": [{"id": "a", "stages": [{"id": "s", "type": "load", "handler": "noop"}]}]}"#;
        let set = PipelineSetSpec::from_json(raw).unwrap();
        assert_eq!(set.pipelines[0].pipeline.stages[0].stage_type, StageType::Load);
        assert!(set.pipelines[0].depends_on.is_empty());
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.yaml");
        std::fs::write(&path, "pipelines: []").unwrap();
        assert!(matches!(
            load_pipeline_set(&path),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.toml");
        std::fs::write(&path, SET_TOML).unwrap();
        let set = load_pipeline_set(&path).unwrap();
        assert_eq!(set.pipelines[1].depends_on, vec!["ingest".to_string()]);
    }
}

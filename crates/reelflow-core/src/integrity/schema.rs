//! Declarative record contracts and shape validation.
//!
//! A [`RecordSchema`] is an ordered list of [`FieldRule`]s addressed by
//! dotted path. Shape checks emit `error` violations categorized by what went
//! wrong: a missing required field, a wrong JSON type, a value outside an
//! enumeration, a malformed string, or a number outside its bounds.

use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CoreError, Result};
use crate::integrity::model::{IntegrityViolation, Severity};
use crate::record::{get_path, json_kind};

pub const MISSING_REQUIRED_FIELD: &str = "MISSING_REQUIRED_FIELD";
pub const INVALID_TYPE: &str = "INVALID_TYPE";
pub const INVALID_ENUM_VALUE: &str = "INVALID_ENUM_VALUE";
pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
pub const INVALID_VALUE_RANGE: &str = "INVALID_VALUE_RANGE";

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// String formats understood by the shape validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    /// `major.minor.patch`
    Semver,
    /// RFC 3339 timestamp
    Timestamp,
    /// Letters, digits, `_ - . :`; must start alphanumeric
    Identifier,
    /// Non-blank string
    NonEmpty,
}

impl FieldFormat {
    fn accepts(self, raw: &str) -> bool {
        match self {
            Self::Semver => semver_pattern().is_match(raw),
            Self::Timestamp => DateTime::parse_from_rfc3339(raw).is_ok(),
            Self::Identifier => identifier_pattern().is_match(raw),
            Self::NonEmpty => !raw.trim().is_empty(),
        }
    }
}

fn semver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("static regex"))
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]*$").expect("static regex"))
}

/// Contract for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FieldFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Value written by the default repair for missing or out-of-enum fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldRule {
    pub fn required(path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            path: path.into(),
            field_type,
            required: true,
            allowed: None,
            format: None,
            min: None,
            max: None,
            default: None,
        }
    }

    pub fn optional(path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(path, field_type)
        }
    }

    pub fn one_of(mut self, allowed: &[&str]) -> Self {
        self.allowed = Some(allowed.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn default_value(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Clamp a number into this rule's bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        let lower = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(lower, |max| lower.min(max))
    }

    fn check(&self, record: &Value, out: &mut Vec<IntegrityViolation>) {
        if !parent_present(record, &self.path) {
            return;
        }

        let value = match get_path(record, &self.path) {
            Some(Value::Null) | None => {
                if self.required {
                    out.push(
                        IntegrityViolation::new(
                            MISSING_REQUIRED_FIELD,
                            Severity::Error,
                            format!("required field `{}` is missing", self.path),
                        )
                        .with_field(&self.path)
                        .repairable(self.default.is_some()),
                    );
                }
                return;
            }
            Some(value) => value,
        };

        if !self.field_type.matches(value) {
            out.push(
                IntegrityViolation::new(
                    INVALID_TYPE,
                    Severity::Error,
                    format!(
                        "field `{}` must be {}, got {}",
                        self.path,
                        self.field_type.name(),
                        json_kind(value)
                    ),
                )
                .with_field(&self.path),
            );
            return;
        }

        if let (Some(allowed), Some(raw)) = (&self.allowed, value.as_str()) {
            if !allowed.iter().any(|a| a == raw) {
                out.push(
                    IntegrityViolation::new(
                        INVALID_ENUM_VALUE,
                        Severity::Error,
                        format!(
                            "field `{}` has value `{}`, expected one of: {}",
                            self.path,
                            raw,
                            allowed.join(", ")
                        ),
                    )
                    .with_field(&self.path)
                    .repairable(self.default.is_some()),
                );
            }
        }

        if let (Some(format), Some(raw)) = (self.format, value.as_str()) {
            if !format.accepts(raw) {
                out.push(
                    IntegrityViolation::new(
                        INVALID_FORMAT,
                        Severity::Error,
                        format!("field `{}` has invalid {:?} format: `{}`", self.path, format, raw),
                    )
                    .with_field(&self.path),
                );
            }
        }

        if let Some(number) = value.as_f64() {
            let below = self.min.is_some_and(|min| number < min);
            let above = self.max.is_some_and(|max| number > max);
            if below || above {
                out.push(
                    IntegrityViolation::new(
                        INVALID_VALUE_RANGE,
                        Severity::Error,
                        format!(
                            "field `{}` value {} is outside [{}, {}]",
                            self.path,
                            number,
                            self.min.map_or("-inf".to_string(), |m| m.to_string()),
                            self.max.map_or("inf".to_string(), |m| m.to_string()),
                        ),
                    )
                    .with_field(&self.path)
                    .repairable(true)
                    .with_details(json!({ "value": number, "min": self.min, "max": self.max })),
                );
            }
        }
    }
}

/// Nested rules only apply when their parent object is present; a missing
/// parent is reported by the parent's own rule.
fn parent_present(record: &Value, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => record.is_object(),
        Some((parent, _)) => get_path(record, parent).is_some_and(Value::is_object),
    }
}

/// Ordered set of field contracts for one record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldRule>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldRule>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Parse a schema from JSON, rejecting empty paths.
    pub fn from_json(raw: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(raw)?;
        if let Some(bad) = schema.fields.iter().find(|f| f.path.trim().is_empty()) {
            return Err(CoreError::InvalidSchema(format!(
                "field rule of type {} has an empty path",
                bad.field_type.name()
            )));
        }
        Ok(schema)
    }

    /// Contract of AI-prompt template records.
    pub fn prompt_template() -> Self {
        Self::new(
            "prompt_template",
            vec![
                FieldRule::required("id", FieldType::String).format(FieldFormat::Identifier),
                FieldRule::required("name", FieldType::String).format(FieldFormat::NonEmpty),
                FieldRule::required("version", FieldType::String)
                    .format(FieldFormat::Semver)
                    .default_value(json!("1.0.0")),
                FieldRule::optional("createdAt", FieldType::String)
                    .format(FieldFormat::Timestamp),
                FieldRule::optional("category", FieldType::String)
                    .one_of(&[
                        "planning",
                        "script",
                        "storyboard",
                        "shooting",
                        "editing",
                        "feedback",
                    ])
                    .default_value(json!("planning")),
                FieldRule::required("content", FieldType::String).format(FieldFormat::NonEmpty),
                FieldRule::required("metadata", FieldType::Object).default_value(json!({})),
                FieldRule::required("metadata.estimatedTokens", FieldType::Integer)
                    .range(Some(1.0), Some(200_000.0)),
                FieldRule::optional("metadata.difficulty", FieldType::String)
                    .one_of(&["beginner", "intermediate", "advanced"]),
                FieldRule::optional("tags", FieldType::Array),
                FieldRule::optional("parentId", FieldType::String)
                    .format(FieldFormat::Identifier),
                FieldRule::optional("structure", FieldType::Object),
                FieldRule::optional("settings", FieldType::Object),
                FieldRule::optional("usage", FieldType::Object),
            ],
        )
    }

    pub fn field(&self, path: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Run every field rule against `record`.
    pub fn validate_shape(&self, record: &Value) -> Vec<IntegrityViolation> {
        let mut out = Vec::new();
        if !record.is_object() {
            out.push(IntegrityViolation::new(
                INVALID_TYPE,
                Severity::Critical,
                format!("record must be an object, got {}", json_kind(record)),
            ));
            return out;
        }
        for rule in &self.fields {
            rule.check(record, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_prompt() -> Value {
        json!({
            "id": "prompt-001",
            "name": "Interview opener",
            "version": "1.2.0",
            "createdAt": "2024-03-01T09:00:00Z",
            "category": "script",
            "content": "Write an opening question for a founder interview.",
            "metadata": { "estimatedTokens": 12, "difficulty": "beginner" }
        })
    }

    fn rule_ids(violations: &[IntegrityViolation]) -> Vec<&str> {
        violations.iter().map(|v| v.rule_id.as_str()).collect()
    }

    #[test]
    fn test_valid_prompt_has_no_shape_violations() {
        let schema = RecordSchema::prompt_template();
        assert!(schema.validate_shape(&valid_prompt()).is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let mut record = valid_prompt();
        record.as_object_mut().unwrap().remove("content");
        let violations = RecordSchema::prompt_template().validate_shape(&record);
        assert_eq!(rule_ids(&violations), vec![MISSING_REQUIRED_FIELD]);
        assert_eq!(violations[0].field.as_deref(), Some("content"));
        assert!(!violations[0].auto_repairable);
    }

    #[test]
    fn test_wrong_type_and_enum_and_format() {
        let mut record = valid_prompt();
        record["name"] = json!(42);
        record["category"] = json!("karaoke");
        record["version"] = json!("one");
        let violations = RecordSchema::prompt_template().validate_shape(&record);
        let ids = rule_ids(&violations);
        assert!(ids.contains(&INVALID_TYPE));
        assert!(ids.contains(&INVALID_ENUM_VALUE));
        assert!(ids.contains(&INVALID_FORMAT));
        assert!(violations.iter().all(|v| v.severity == Severity::Error));
    }

    #[test]
    fn test_negative_tokens_is_repairable_range_violation() {
        let mut record = valid_prompt();
        record["metadata"]["estimatedTokens"] = json!(-50);
        let violations = RecordSchema::prompt_template().validate_shape(&record);
        assert_eq!(rule_ids(&violations), vec![INVALID_VALUE_RANGE]);
        assert!(violations[0].auto_repairable);
    }

    #[test]
    fn test_missing_parent_suppresses_nested_rules() {
        let mut record = valid_prompt();
        record.as_object_mut().unwrap().remove("metadata");
        let violations = RecordSchema::prompt_template().validate_shape(&record);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field.as_deref(), Some("metadata"));
    }

    #[test]
    fn test_non_object_record_is_critical() {
        let violations = RecordSchema::prompt_template().validate_shape(&json!([1, 2]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Critical);
    }

    #[test]
    fn test_schema_from_json_rejects_empty_path() {
        let raw = r#"{"name": "x", "fields": [{"path": " ", "type": "string"}]}"#;
        assert!(matches!(
            RecordSchema::from_json(raw),
            Err(CoreError::InvalidSchema(_))
        ));

        let raw = r#"{"name": "x", "fields": [{"path": "title", "type": "string", "required": true}]}"#;
        let schema = RecordSchema::from_json(raw).unwrap();
        assert!(schema.field("title").unwrap().required);
    }

    #[test]
    fn test_clamp_respects_bounds() {
        let rule = FieldRule::required("n", FieldType::Number).range(Some(1.0), Some(10.0));
        assert_eq!(rule.clamp(-5.0), 1.0);
        assert_eq!(rule.clamp(50.0), 10.0);
        assert_eq!(rule.clamp(5.0), 5.0);
    }
}

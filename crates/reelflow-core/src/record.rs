//! Record helpers shared by validation, conflict resolution and the engine.
//!
//! Records are opaque JSON payloads (`serde_json::Value`). The helpers here
//! read the handful of well-known fields the core cares about (`id`,
//! `version`, `createdAt`) and address nested fields by dotted path.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Identifier field of a record.
pub const ID_FIELD: &str = "id";
/// Version field of a record.
pub const VERSION_FIELD: &str = "version";
/// Creation timestamp field of a record.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Return the record identifier when present and a string.
pub fn record_id(record: &Value) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}

/// Return the record version string when present.
pub fn record_version(record: &Value) -> Option<&str> {
    record.get(VERSION_FIELD).and_then(Value::as_str)
}

/// Return the record creation timestamp string when present.
pub fn record_created_at(record: &Value) -> Option<&str> {
    record.get(CREATED_AT_FIELD).and_then(Value::as_str)
}

/// Look up a dotted path such as `metadata.estimatedTokens`.
pub fn get_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

/// Write `value` at a dotted path, creating intermediate objects as needed.
///
/// Returns `false` when a non-object value sits on the path.
pub fn set_path(record: &mut Value, path: &str, value: Value) -> bool {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return false;
    };

    let mut current = record;
    for segment in segments {
        let Some(obj) = current.as_object_mut() else {
            return false;
        };
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    match current.as_object_mut() {
        Some(obj) => {
            obj.insert(last.to_string(), value);
            true
        }
        None => false,
    }
}

/// Interpret a JSON document as a record set.
///
/// Accepts a top-level array, or an object carrying the array under
/// `records` (the export envelope).
pub fn records_from_value(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut envelope) => match envelope.remove("records") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(CoreError::InvalidRecord(
                "expected an array or an object with a `records` array".to_string(),
            )),
        },
        other => Err(CoreError::InvalidRecord(format!(
            "expected an array of records, got {}",
            json_kind(&other)
        ))),
    }
}

/// Read a record set from a JSON file.
pub fn read_records(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;
    records_from_value(value)
}

/// Short JSON type name used in messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A `major.minor.patch` version.
///
/// Parsing is lenient: missing components are `0`, and each component uses
/// its leading digits only (`"3-beta"` reads as `3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.trim().trim_start_matches('v').split('.').map(leading_number);
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn leading_number(component: &str) -> u64 {
    let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Compare two version strings component by component.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    SemVer::parse(a).cmp(&SemVer::parse(b))
}

/// Something that knows how many records it carries.
///
/// Sequences count their elements. Mappings sum the lengths of their
/// sequence-valued members and count every other member as one. Anything
/// else is a single record.
pub trait RecordCount {
    fn record_count(&self) -> usize;
}

impl RecordCount for Value {
    fn record_count(&self) -> usize {
        match self {
            Value::Array(items) => items.len(),
            Value::Object(members) => members
                .values()
                .map(|v| match v {
                    Value::Array(items) => items.len(),
                    _ => 1,
                })
                .sum(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_semver_missing_components_are_zero() {
        assert_eq!(SemVer::parse("2"), SemVer::new(2, 0, 0));
        assert_eq!(SemVer::parse("1.4"), SemVer::new(1, 4, 0));
        assert_eq!(SemVer::parse("v3.2.1-beta"), SemVer::new(3, 2, 1));
    }

    #[test]
    fn test_compare_versions_is_component_wise() {
        assert_eq!(compare_versions("1.0.0", "1.1.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_record_count_heuristic() {
        assert_eq!(json!([1, 2, 3]).record_count(), 3);
        assert_eq!(json!({"a": [1, 2], "b": [3], "c": "x"}).record_count(), 4);
        assert_eq!(json!("scalar").record_count(), 1);
        assert_eq!(json!(null).record_count(), 1);
    }

    #[test]
    fn test_get_and_set_path() {
        let mut record = json!({"metadata": {"estimatedTokens": 10}});
        assert_eq!(
            get_path(&record, "metadata.estimatedTokens"),
            Some(&json!(10))
        );
        assert!(set_path(&mut record, "metadata.estimatedTokens", json!(42)));
        assert!(set_path(&mut record, "settings.tone", json!("warm")));
        assert_eq!(record["metadata"]["estimatedTokens"], json!(42));
        assert_eq!(record["settings"]["tone"], json!("warm"));
    }

    #[test]
    fn test_records_from_value_accepts_array_and_envelope() {
        let bare = records_from_value(json!([{"id": "a"}, {"id": "b"}])).unwrap();
        assert_eq!(bare.len(), 2);

        let envelope = records_from_value(json!({"records": [{"id": "a"}]})).unwrap();
        assert_eq!(record_id(&envelope[0]), Some("a"));

        let err = records_from_value(json!("nope")).unwrap_err();
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn test_set_path_rejects_scalar_parent() {
        let mut record = json!({"metadata": 5});
        assert!(!set_path(&mut record, "metadata.estimatedTokens", json!(1)));
    }
}

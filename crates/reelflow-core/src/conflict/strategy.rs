//! Built-in resolution strategies.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::conflict::error::{ConflictError, ConflictResult};
use crate::conflict::model::{ConflictResolution, DataConflict};
use crate::record::{record_created_at, record_id, record_version, SemVer, ID_FIELD, VERSION_FIELD};

/// Fields whose existing value survives a merge.
pub const PRESERVED_FIELDS: &[&str] = &["usage", "statistics", "stats"];

/// Resolution strategy by name.
///
/// Any name other than the built-ins parses to [`ResolutionStrategy::Named`],
/// which the resolver looks up among custom resolvers and conditional
/// strategies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResolutionStrategy {
    #[default]
    Skip,
    Overwrite,
    Merge,
    Rename,
    UseLatestVersion,
    UseLatestTimestamp,
    Named(String),
}

impl ResolutionStrategy {
    pub fn name(&self) -> &str {
        match self {
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
            Self::Merge => "merge",
            Self::Rename => "rename",
            Self::UseLatestVersion => "use_latest_version",
            Self::UseLatestTimestamp => "use_latest_timestamp",
            Self::Named(name) => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Named(_))
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "skip" => Self::Skip,
            "overwrite" => Self::Overwrite,
            "merge" => Self::Merge,
            "rename" => Self::Rename,
            "use_latest_version" => Self::UseLatestVersion,
            "use_latest_timestamp" => Self::UseLatestTimestamp,
            other => Self::Named(other.to_string()),
        })
    }
}

impl From<String> for ResolutionStrategy {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(strategy) => strategy,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for ResolutionStrategy {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ResolutionStrategy> for String {
    fn from(strategy: ResolutionStrategy) -> Self {
        strategy.name().to_string()
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Apply a built-in strategy.
///
/// `taken_ids` is the set of identifiers a renamed record must avoid. The
/// result depends only on the conflict, the strategy and `taken_ids`.
pub fn apply_builtin(
    strategy: &ResolutionStrategy,
    conflict: &DataConflict,
    taken_ids: &HashSet<String>,
) -> ConflictResult<ConflictResolution> {
    let existing = &conflict.existing_item;
    let incoming = &conflict.incoming_item;
    let name = strategy.name();

    let resolution = match strategy {
        ResolutionStrategy::Skip => {
            ConflictResolution::resolved(name, existing.clone(), "kept_existing")
        }
        ResolutionStrategy::Overwrite => {
            ConflictResolution::resolved(name, incoming.clone(), "replaced_with_incoming")
        }
        ResolutionStrategy::Merge => {
            let (merged, preserved) = merge_records(existing, incoming)?;
            let version = record_version(&merged).unwrap_or_default().to_string();
            ConflictResolution::resolved(name, merged, "merged").with_metadata(json!({
                "preservedFields": preserved,
                "version": version,
            }))
        }
        ResolutionStrategy::Rename => {
            let original = record_id(incoming).ok_or_else(|| ConflictError::InvalidRecord {
                strategy: name.to_string(),
                reason: "incoming record has no id".to_string(),
            })?;
            let new_id = unique_id(&derived_id(original, incoming), taken_ids);
            let mut renamed = incoming.clone();
            if let Some(obj) = renamed.as_object_mut() {
                obj.insert(ID_FIELD.to_string(), Value::String(new_id.clone()));
            }
            ConflictResolution::resolved(name, renamed, "renamed_incoming").with_metadata(json!({
                "originalId": original,
                "newId": new_id,
            }))
        }
        ResolutionStrategy::UseLatestVersion => {
            let existing_v = SemVer::parse(record_version(existing).unwrap_or_default());
            let incoming_v = SemVer::parse(record_version(incoming).unwrap_or_default());
            if incoming_v > existing_v {
                ConflictResolution::resolved(name, incoming.clone(), "used_incoming_version")
            } else {
                ConflictResolution::resolved(name, existing.clone(), "kept_existing_version")
            }
        }
        ResolutionStrategy::UseLatestTimestamp => {
            match compare_timestamps(record_created_at(incoming), record_created_at(existing)) {
                Ordering::Greater => {
                    ConflictResolution::resolved(name, incoming.clone(), "used_incoming_timestamp")
                }
                _ => ConflictResolution::resolved(name, existing.clone(), "kept_existing_timestamp"),
            }
        }
        ResolutionStrategy::Named(other) => {
            return Err(ConflictError::UnsupportedStrategy {
                strategy: other.clone(),
            })
        }
    };
    Ok(resolution)
}

/// Merge `incoming` over `existing`.
///
/// Incoming values win except for [`PRESERVED_FIELDS`] present on the
/// existing record. The version becomes the higher of the two. Returns the
/// merged record and the names of the preserved fields.
pub fn merge_records(existing: &Value, incoming: &Value) -> ConflictResult<(Value, Vec<String>)> {
    let (Some(base), Some(overlay)) = (existing.as_object(), incoming.as_object()) else {
        return Err(ConflictError::InvalidRecord {
            strategy: ResolutionStrategy::Merge.name().to_string(),
            reason: "both records must be objects".to_string(),
        });
    };

    let mut merged = base.clone();
    let mut preserved = Vec::new();
    for (key, value) in overlay {
        if PRESERVED_FIELDS.contains(&key.as_str()) && base.contains_key(key) {
            preserved.push(key.clone());
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    let winner = match (record_version(existing), record_version(incoming)) {
        (Some(ours), Some(theirs)) if SemVer::parse(theirs) > SemVer::parse(ours) => Some(theirs),
        (Some(ours), _) => Some(ours),
        (None, theirs) => theirs,
    };
    if let Some(version) = winner {
        merged.insert(VERSION_FIELD.to_string(), Value::String(version.to_string()));
    }
    Ok((Value::Object(merged), preserved))
}

/// `{id}_{first 8 hex chars of sha256(record)}`.
fn derived_id(original: &str, record: &Value) -> String {
    let digest = Sha256::digest(record.to_string().as_bytes());
    let suffix = hex::encode(digest);
    format!("{original}_{}", &suffix[..8])
}

/// Append a counter until the id is free.
pub(crate) fn unique_id(candidate: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(candidate) {
        return candidate.to_string();
    }
    (2u64..)
        .map(|n| format!("{candidate}_{n}"))
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| candidate.to_string())
}

/// RFC 3339 comparison; a missing or unparsable timestamp is older than
/// any valid one.
fn compare_timestamps(a: Option<&str>, b: Option<&str>) -> Ordering {
    let parse = |raw: Option<&str>| {
        raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    };
    parse(a).cmp(&parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::model::{ConflictSeverity, ConflictType};

    fn conflict(existing: Value, incoming: Value) -> DataConflict {
        DataConflict {
            conflict_type: ConflictType::Id,
            field: "id".to_string(),
            existing_value: existing["id"].clone(),
            incoming_value: incoming["id"].clone(),
            severity: ConflictSeverity::Critical,
            existing_item: existing,
            incoming_item: incoming,
        }
    }

    fn apply(strategy: ResolutionStrategy, c: &DataConflict) -> ConflictResolution {
        apply_builtin(&strategy, c, &HashSet::new()).unwrap()
    }

    #[test]
    fn test_parse_strategy_names() {
        assert_eq!(
            "use_latest_version".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::UseLatestVersion
        );
        assert_eq!(
            ResolutionStrategy::from("prefer_editor"),
            ResolutionStrategy::Named("prefer_editor".to_string())
        );
        assert_eq!(ResolutionStrategy::Merge.to_string(), "merge");
        let parsed: ResolutionStrategy = serde_json::from_str("\"rename\"").unwrap();
        assert_eq!(parsed, ResolutionStrategy::Rename);
    }

    #[test]
    fn test_skip_keeps_existing() {
        let c = conflict(json!({"id": "a", "name": "old"}), json!({"id": "a", "name": "new"}));
        let first = apply(ResolutionStrategy::Skip, &c);
        assert_eq!(first.resolved_item, c.existing_item);
        assert_eq!(first, apply(ResolutionStrategy::Skip, &c));
    }

    #[test]
    fn test_merge_preserves_usage_and_takes_higher_version() {
        let existing = json!({
            "id": "a", "version": "2.0.0", "name": "old",
            "usage": {"count": 41}, "owner": "studio"
        });
        let incoming = json!({
            "id": "a", "version": "1.5.0", "name": "new",
            "usage": {"count": 0}
        });
        let c = conflict(existing, incoming);
        let merged = apply(ResolutionStrategy::Merge, &c);
        assert_eq!(merged.resolved_item["name"], json!("new"));
        assert_eq!(merged.resolved_item["usage"], json!({"count": 41}));
        assert_eq!(merged.resolved_item["owner"], json!("studio"));
        assert_eq!(merged.resolved_item["version"], json!("2.0.0"));
        assert_eq!(merged, apply(ResolutionStrategy::Merge, &c));
    }

    #[test]
    fn test_merge_keeps_original_version_text() {
        let existing = json!({"id": "a", "version": "v1.2.0-beta", "name": "old"});
        let incoming = json!({"id": "a", "version": "1.2", "name": "new"});
        let (merged, _) = merge_records(&existing, &incoming).unwrap();
        assert_eq!(merged["version"], json!("v1.2.0-beta"));

        let incoming = json!({"id": "a", "version": "1.3", "name": "new"});
        let (merged, _) = merge_records(&existing, &incoming).unwrap();
        assert_eq!(merged["version"], json!("1.3"));

        let (merged, _) = merge_records(&json!({"id": "a"}), &incoming).unwrap();
        assert_eq!(merged["version"], json!("1.3"));
    }

    #[test]
    fn test_merge_rejects_non_objects() {
        let c = conflict(json!({"id": "a"}), json!({"id": "a"}));
        let mut broken = c.clone();
        broken.existing_item = json!("scalar");
        assert!(apply_builtin(&ResolutionStrategy::Merge, &broken, &HashSet::new()).is_err());
    }

    #[test]
    fn test_rename_is_deterministic_and_avoids_taken() {
        let c = conflict(json!({"id": "a", "v": 1}), json!({"id": "a", "v": 2}));
        let first = apply(ResolutionStrategy::Rename, &c);
        let new_id = first.resolved_item["id"].as_str().unwrap().to_string();
        assert!(new_id.starts_with("a_"));
        assert_eq!(new_id.len(), "a_".len() + 8);
        assert_eq!(first, apply(ResolutionStrategy::Rename, &c));

        let taken: HashSet<String> = [new_id.clone()].into_iter().collect();
        let second = apply_builtin(&ResolutionStrategy::Rename, &c, &taken).unwrap();
        assert_eq!(second.resolved_item["id"], json!(format!("{new_id}_2")));
    }

    #[test]
    fn test_latest_version_picks_winner() {
        let c = conflict(
            json!({"id": "a", "version": "1.0.0"}),
            json!({"id": "a", "version": "1.1.0"}),
        );
        assert_eq!(
            apply(ResolutionStrategy::UseLatestVersion, &c).resolved_item["version"],
            json!("1.1.0")
        );

        let c = conflict(
            json!({"id": "a", "version": "2.0.0"}),
            json!({"id": "a", "version": "1.9.9"}),
        );
        assert_eq!(
            apply(ResolutionStrategy::UseLatestVersion, &c).resolved_item["version"],
            json!("2.0.0")
        );
    }

    #[test]
    fn test_latest_timestamp_picks_newer() {
        let c = conflict(
            json!({"id": "a", "createdAt": "2024-03-01T10:00:00Z"}),
            json!({"id": "a", "createdAt": "2024-03-01T12:00:00+01:00"}),
        );
        let r = apply(ResolutionStrategy::UseLatestTimestamp, &c);
        assert_eq!(r.action, "used_incoming_timestamp");

        let c = conflict(
            json!({"id": "a", "createdAt": "2024-03-01T10:00:00Z"}),
            json!({"id": "a", "createdAt": "garbage"}),
        );
        let r = apply(ResolutionStrategy::UseLatestTimestamp, &c);
        assert_eq!(r.action, "kept_existing_timestamp");
    }

    #[test]
    fn test_named_strategy_is_unsupported_here() {
        let c = conflict(json!({"id": "a"}), json!({"id": "a"}));
        let err = apply_builtin(&"coin_flip".into(), &c, &HashSet::new()).unwrap_err();
        assert_eq!(
            err,
            ConflictError::UnsupportedStrategy {
                strategy: "coin_flip".to_string()
            }
        );
    }
}

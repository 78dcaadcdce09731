//! Conflict detection between incoming and existing record sets.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::conflict::model::{ConflictSeverity, ConflictType, DataConflict};
use crate::record::{get_path, record_id, CREATED_AT_FIELD, ID_FIELD, VERSION_FIELD};

pub const PARENT_ID_FIELD: &str = "parentId";

/// Fields compared for data conflicts unless the resolver is configured
/// otherwise.
pub const DEFAULT_TRACKED_FIELDS: &[&str] = &[
    "name",
    "description",
    "category",
    "content",
    "tags",
    "variables",
    "structure",
    "settings",
    "metadata",
];

/// Detect conflicts for every incoming record whose id matches an existing
/// record.
///
/// Per matched record the conflicts come out as: id, version, reference,
/// one data conflict per differing tracked field (in `tracked` order),
/// timestamp. Records without an id, or without a match, yield nothing.
pub fn detect_conflicts(
    incoming: &[Value],
    existing: &[Value],
    tracked: &[String],
) -> Vec<DataConflict> {
    let existing_by_id: HashMap<&str, &Value> = existing
        .iter()
        .filter_map(|r| record_id(r).map(|id| (id, r)))
        .collect();
    let known_ids: HashSet<&str> = existing
        .iter()
        .chain(incoming.iter())
        .filter_map(record_id)
        .collect();

    let mut conflicts = Vec::new();
    for item in incoming {
        let Some(id) = record_id(item) else {
            continue;
        };
        let Some(current) = existing_by_id.get(id).copied() else {
            continue;
        };
        let conflict = |conflict_type, field: &str, severity| DataConflict {
            conflict_type,
            field: field.to_string(),
            existing_value: field_value(current, field),
            incoming_value: field_value(item, field),
            severity,
            existing_item: current.clone(),
            incoming_item: item.clone(),
        };

        conflicts.push(conflict(ConflictType::Id, ID_FIELD, ConflictSeverity::Critical));

        if get_path(current, VERSION_FIELD) != get_path(item, VERSION_FIELD) {
            conflicts.push(conflict(
                ConflictType::Version,
                VERSION_FIELD,
                ConflictSeverity::Major,
            ));
        }

        if let Some(parent) = item.get(PARENT_ID_FIELD).and_then(Value::as_str) {
            if !known_ids.contains(parent) {
                conflicts.push(conflict(
                    ConflictType::Reference,
                    PARENT_ID_FIELD,
                    ConflictSeverity::Major,
                ));
            }
        }

        for field in tracked {
            if get_path(current, field) != get_path(item, field) {
                conflicts.push(conflict(ConflictType::Data, field, ConflictSeverity::Minor));
            }
        }

        if get_path(current, CREATED_AT_FIELD) != get_path(item, CREATED_AT_FIELD) {
            conflicts.push(conflict(
                ConflictType::Timestamp,
                CREATED_AT_FIELD,
                ConflictSeverity::Minor,
            ));
        }
    }
    conflicts
}

fn field_value(record: &Value, field: &str) -> Value {
    get_path(record, field).cloned().unwrap_or(Value::Null)
}

pub(crate) fn default_tracked_fields() -> Vec<String> {
    DEFAULT_TRACKED_FIELDS.iter().map(|f| f.to_string()).collect()
}

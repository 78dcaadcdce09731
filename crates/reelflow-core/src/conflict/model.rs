//! Conflict types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::record_id;

/// What kind of mismatch a conflict describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Id,
    Version,
    Reference,
    Data,
    Timestamp,
}

impl ConflictType {
    /// Tie-break rank within one severity; higher resolves first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Id => 5,
            Self::Version => 4,
            Self::Reference => 3,
            Self::Data => 2,
            Self::Timestamp => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Version => "version",
            Self::Reference => "reference",
            Self::Data => "data",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "version" => Ok(Self::Version),
            "reference" => Ok(Self::Reference),
            "data" => Ok(Self::Data),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(format!("unknown conflict type `{other}`")),
        }
    }
}

/// Conflict severity. Ordered `Minor < Major < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Minor,
    Major,
    Critical,
}

/// A mismatch between an incoming record and the existing record with the
/// same identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConflict {
    pub conflict_type: ConflictType,
    /// Field in contention.
    pub field: String,
    pub existing_value: Value,
    pub incoming_value: Value,
    pub severity: ConflictSeverity,
    pub existing_item: Value,
    pub incoming_item: Value,
}

impl DataConflict {
    pub fn incoming_id(&self) -> Option<&str> {
        record_id(&self.incoming_item)
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Name of the strategy applied.
    pub strategy: String,
    pub success: bool,
    pub resolved_item: Value,
    /// Short machine-friendly description, e.g. `kept_existing`.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConflictResolution {
    pub fn resolved(strategy: impl Into<String>, resolved_item: Value, action: &str) -> Self {
        Self {
            strategy: strategy.into(),
            success: true,
            resolved_item,
            action: action.to_string(),
            metadata: None,
            error: None,
        }
    }

    /// Failed resolution; the existing record is the safe fallback.
    pub fn failed(strategy: impl Into<String>, conflict: &DataConflict, error: String) -> Self {
        Self {
            strategy: strategy.into(),
            success: false,
            resolved_item: conflict.existing_item.clone(),
            action: "kept_existing_on_error".to_string(),
            metadata: None,
            error: Some(error),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

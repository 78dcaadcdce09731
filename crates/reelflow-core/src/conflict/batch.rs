//! Prioritized batch resolution.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::conflict::error::ConflictError;
use crate::conflict::model::{
    ConflictResolution, ConflictSeverity, ConflictType, DataConflict,
};
use crate::conflict::resolver::{fail, ConflictCondition, ConflictResolver};
use crate::conflict::strategy::{unique_id, ResolutionStrategy};
use crate::obs::emit_conflicts_resolved;
use crate::record::{record_id, ID_FIELD};

/// Overrides both ordering and strategy choice for matching conflicts.
///
/// Conflicts matching an earlier rule are resolved before conflicts matching
/// a later one, which in turn precede conflicts matching none.
#[derive(Clone)]
pub struct PriorityRule {
    pub name: String,
    condition: ConflictCondition,
    pub strategy: ResolutionStrategy,
}

impl PriorityRule {
    pub fn new<F>(name: impl Into<String>, condition: F, strategy: ResolutionStrategy) -> Self
    where
        F: Fn(&DataConflict) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            condition: Arc::new(condition),
            strategy,
        }
    }

    pub fn matches(&self, conflict: &DataConflict) -> bool {
        (self.condition)(conflict)
    }
}

impl fmt::Debug for PriorityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityRule")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Options for [`ConflictResolver::resolve_batch_conflicts`].
#[derive(Debug, Clone)]
pub struct BatchResolutionOptions {
    pub default_strategy: ResolutionStrategy,
    pub strategy_by_type: HashMap<ConflictType, ResolutionStrategy>,
    pub priority_rules: Vec<PriorityRule>,
    /// Resolve each chunk concurrently on the blocking pool.
    pub parallel_processing: bool,
    /// Resolutions per chunk; `0` is treated as `1`.
    pub batch_size: usize,
}

impl Default for BatchResolutionOptions {
    fn default() -> Self {
        Self {
            default_strategy: ResolutionStrategy::Skip,
            strategy_by_type: HashMap::new(),
            priority_rules: Vec::new(),
            parallel_processing: false,
            batch_size: 50,
        }
    }
}

impl BatchResolutionOptions {
    pub fn with_default(strategy: ResolutionStrategy) -> Self {
        Self {
            default_strategy: strategy,
            ..Default::default()
        }
    }

    pub fn for_type(mut self, conflict_type: ConflictType, strategy: ResolutionStrategy) -> Self {
        self.strategy_by_type.insert(conflict_type, strategy);
        self
    }

    pub fn with_priority_rule(mut self, rule: PriorityRule) -> Self {
        self.priority_rules.push(rule);
        self
    }

    fn strategy_for(&self, conflict: &DataConflict) -> ResolutionStrategy {
        self.priority_rules
            .iter()
            .find(|r| r.matches(conflict))
            .map(|r| r.strategy.clone())
            .or_else(|| self.strategy_by_type.get(&conflict.conflict_type).cloned())
            .unwrap_or_else(|| self.default_strategy.clone())
    }

    fn rule_rank(&self, conflict: &DataConflict) -> usize {
        self.priority_rules
            .iter()
            .position(|r| r.matches(conflict))
            .unwrap_or(self.priority_rules.len())
    }
}

/// One line of the per-conflict resolution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionLogEntry {
    pub incoming_id: String,
    pub conflict_type: ConflictType,
    pub field: String,
    pub severity: ConflictSeverity,
    pub strategy: String,
    pub success: bool,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Conflict counts keyed by type and by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictStats {
    pub by_type: BTreeMap<ConflictType, usize>,
    pub by_severity: BTreeMap<ConflictSeverity, usize>,
}

impl ConflictStats {
    fn from_conflicts(conflicts: &[DataConflict]) -> Self {
        let mut stats = Self::default();
        for c in conflicts {
            *stats.by_type.entry(c.conflict_type).or_insert(0) += 1;
            *stats.by_severity.entry(c.severity).or_insert(0) += 1;
        }
        stats
    }
}

/// Outcome of a batch resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResolutionSummary {
    pub total_processed: usize,
    pub conflicts_detected: usize,
    pub resolutions_applied: usize,
    pub failed_resolutions: usize,
    /// Conflicts not resolved because their incoming id already was.
    pub skipped_conflicts: usize,
    pub resolved_records: Vec<Value>,
    pub log: Vec<ResolutionLogEntry>,
    pub stats: ConflictStats,
}

impl ConflictResolver {
    /// Detect and resolve conflicts for a whole batch.
    ///
    /// Conflicts are ordered by matching priority rule, then severity, then
    /// type priority; the first conflict for each incoming id picks the
    /// resolution and later ones for that id are skipped. The resolved set
    /// keeps incoming order: records without conflicts pass through and each
    /// resolved id appears once.
    pub async fn resolve_batch_conflicts(
        &self,
        incoming: &[Value],
        existing: &[Value],
        options: &BatchResolutionOptions,
    ) -> BatchResolutionSummary {
        let conflicts = self.detect_conflicts(incoming, existing);
        let stats = ConflictStats::from_conflicts(&conflicts);

        let mut ordered: Vec<&DataConflict> = conflicts.iter().collect();
        ordered.sort_by_key(|c| {
            (
                options.rule_rank(c),
                Reverse(c.severity),
                Reverse(c.conflict_type.priority()),
            )
        });

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut chosen: Vec<(DataConflict, ResolutionStrategy)> = Vec::new();
        let mut skipped_conflicts = 0;
        for conflict in ordered {
            let Some(id) = conflict.incoming_id() else {
                continue;
            };
            if !claimed.insert(id) {
                skipped_conflicts += 1;
                continue;
            }
            chosen.push((conflict.clone(), options.strategy_for(conflict)));
        }

        let taken: HashSet<String> = existing
            .iter()
            .chain(incoming.iter())
            .filter_map(record_id)
            .map(str::to_string)
            .collect();

        let chunk_size = options.batch_size.max(1);
        let mut resolutions: Vec<ConflictResolution> = Vec::with_capacity(chosen.len());
        for chunk in chosen.chunks(chunk_size) {
            if options.parallel_processing {
                resolutions.extend(self.resolve_chunk_parallel(chunk, &taken).await);
            } else {
                resolutions.extend(chunk.iter().map(|(conflict, strategy)| {
                    self.resolve_with_taken(conflict, strategy, &taken)
                        .unwrap_or_else(|e| fail(strategy, conflict, e))
                }));
            }
        }

        let mut assigned = taken;
        let mut log = Vec::with_capacity(resolutions.len());
        let mut by_id: HashMap<String, Value> = HashMap::new();
        for ((conflict, _), mut resolution) in chosen.iter().zip(resolutions) {
            let incoming_id = conflict.incoming_id().unwrap_or_default().to_string();
            if resolution.success {
                dedupe_renamed_id(&incoming_id, &mut resolution.resolved_item, &mut assigned);
            }
            log.push(ResolutionLogEntry {
                incoming_id: incoming_id.clone(),
                conflict_type: conflict.conflict_type,
                field: conflict.field.clone(),
                severity: conflict.severity,
                strategy: resolution.strategy.clone(),
                success: resolution.success,
                action: resolution.action.clone(),
                error: resolution.error.clone(),
            });
            by_id.insert(incoming_id, resolution.resolved_item);
        }

        let mut resolved_records = Vec::with_capacity(incoming.len());
        for item in incoming {
            match record_id(item) {
                Some(id) if claimed.contains(id) => {
                    if let Some(resolved) = by_id.remove(id) {
                        resolved_records.push(resolved);
                    }
                }
                _ => resolved_records.push(item.clone()),
            }
        }

        let resolutions_applied = log.iter().filter(|e| e.success).count();
        let failed_resolutions = log.len() - resolutions_applied;
        emit_conflicts_resolved(
            conflicts.len(),
            resolutions_applied,
            failed_resolutions,
            skipped_conflicts,
        );
        info!(
            incoming = incoming.len(),
            conflicts = conflicts.len(),
            applied = resolutions_applied,
            failed = failed_resolutions,
            "batch conflict resolution finished"
        );

        BatchResolutionSummary {
            total_processed: incoming.len(),
            conflicts_detected: conflicts.len(),
            resolutions_applied,
            failed_resolutions,
            skipped_conflicts,
            resolved_records,
            log,
            stats,
        }
    }

    async fn resolve_chunk_parallel(
        &self,
        chunk: &[(DataConflict, ResolutionStrategy)],
        taken: &HashSet<String>,
    ) -> Vec<ConflictResolution> {
        let taken = Arc::new(taken.clone());
        let tasks = chunk.iter().map(|(conflict, strategy)| {
            let resolver = self.clone();
            let taken = Arc::clone(&taken);
            let conflict = conflict.clone();
            let strategy = strategy.clone();
            async move {
                let fallback = (conflict.clone(), strategy.clone());
                tokio::task::spawn_blocking(move || {
                    resolver
                        .resolve_with_taken(&conflict, &strategy, &taken)
                        .unwrap_or_else(|e| fail(&strategy, &conflict, e))
                })
                .await
                .unwrap_or_else(|e| {
                    let (conflict, strategy) = fallback;
                    let error = ConflictError::ResolverFailed {
                        resolver: strategy.name().to_string(),
                        reason: format!("resolution task failed: {e}"),
                    };
                    fail(&strategy, &conflict, error)
                })
            }
        });
        join_all(tasks).await
    }
}

/// A renamed record must not reuse an id handed out earlier in the batch.
fn dedupe_renamed_id(original: &str, item: &mut Value, assigned: &mut HashSet<String>) {
    let Some(id) = record_id(item).map(str::to_string) else {
        return;
    };
    if id == original {
        return;
    }
    let unique = unique_id(&id, assigned);
    if unique != id {
        if let Some(obj) = item.as_object_mut() {
            obj.insert(ID_FIELD.to_string(), Value::String(unique.clone()));
        }
    }
    assigned.insert(unique);
}

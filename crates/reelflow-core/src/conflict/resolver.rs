//! Strategy registry and single-conflict resolution.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::conflict::detect::{default_tracked_fields, detect_conflicts};
use crate::conflict::error::{ConflictError, ConflictResult};
use crate::conflict::model::{ConflictResolution, DataConflict};
use crate::conflict::strategy::{apply_builtin, ResolutionStrategy};

/// Custom resolver: returns the resolved record or a failure reason.
pub type ResolverFn = Arc<dyn Fn(&DataConflict) -> Result<Value, String> + Send + Sync>;

/// Predicate over a conflict.
pub type ConflictCondition = Arc<dyn Fn(&DataConflict) -> bool + Send + Sync>;

/// A named strategy that only applies when its condition holds, delegating
/// to a built-in strategy or a custom resolver.
#[derive(Clone)]
pub struct ConditionalStrategy {
    pub name: String,
    condition: ConflictCondition,
    pub strategy: ResolutionStrategy,
}

impl ConditionalStrategy {
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

    pub fn applies(&self, conflict: &DataConflict) -> bool {
        (self.condition)(conflict)
    }
}

impl fmt::Debug for ConditionalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalStrategy")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
struct ResolverRegistry {
    custom: HashMap<String, ResolverFn>,
    conditional: Vec<ConditionalStrategy>,
}

/// Detects and resolves conflicts between incoming and existing records.
///
/// Cloning is cheap; registrations after a clone do not affect the other
/// copy.
#[derive(Clone)]
pub struct ConflictResolver {
    tracked_fields: Arc<Vec<String>>,
    registry: Arc<ResolverRegistry>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<&String> = self.registry.custom.keys().collect();
        custom.sort();
        f.debug_struct("ConflictResolver")
            .field("tracked_fields", &self.tracked_fields)
            .field("custom", &custom)
            .field("conditional", &self.registry.conditional)
            .finish()
    }
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self {
            tracked_fields: Arc::new(default_tracked_fields()),
            registry: Arc::new(ResolverRegistry::default()),
        }
    }

    /// Replace the fields compared for data conflicts. Dotted paths are
    /// allowed.
    pub fn with_tracked_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_fields = Arc::new(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn tracked_fields(&self) -> &[String] {
        &self.tracked_fields
    }

    pub fn add_custom_resolver<F>(&mut self, name: impl Into<String>, resolver: F)
    where
        F: Fn(&DataConflict) -> Result<Value, String> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(resolver = %name, "registered custom resolver");
        Arc::make_mut(&mut self.registry)
            .custom
            .insert(name, Arc::new(resolver));
    }

    /// Conditional strategies sharing a name are tried in registration order.
    pub fn add_conditional_strategy(&mut self, strategy: ConditionalStrategy) {
        debug!(strategy = %strategy.name, "registered conditional strategy");
        Arc::make_mut(&mut self.registry).conditional.push(strategy);
    }

    pub fn detect_conflicts(&self, incoming: &[Value], existing: &[Value]) -> Vec<DataConflict> {
        detect_conflicts(incoming, existing, &self.tracked_fields)
    }

    /// Resolve one conflict, returning the error for unknown or failing
    /// strategies.
    pub fn try_resolve_conflict(
        &self,
        conflict: &DataConflict,
        strategy: &ResolutionStrategy,
    ) -> ConflictResult<ConflictResolution> {
        let taken: HashSet<String> = [&conflict.existing_item, &conflict.incoming_item]
            .into_iter()
            .filter_map(crate::record::record_id)
            .map(str::to_string)
            .collect();
        self.resolve_with_taken(conflict, strategy, &taken)
    }

    /// Resolve one conflict. Failures are reported in the result with the
    /// existing record as the resolved item.
    pub fn resolve_conflict(
        &self,
        conflict: &DataConflict,
        strategy: &ResolutionStrategy,
    ) -> ConflictResolution {
        self.try_resolve_conflict(conflict, strategy)
            .unwrap_or_else(|e| fail(strategy, conflict, e))
    }

    pub(crate) fn resolve_with_taken(
        &self,
        conflict: &DataConflict,
        strategy: &ResolutionStrategy,
        taken: &HashSet<String>,
    ) -> ConflictResult<ConflictResolution> {
        let ResolutionStrategy::Named(name) = strategy else {
            return apply_builtin(strategy, conflict, taken);
        };

        if let Some(resolver) = self.registry.custom.get(name) {
            return run_custom(name, resolver, conflict);
        }

        let mut candidates = self
            .registry
            .conditional
            .iter()
            .filter(|c| &c.name == name)
            .peekable();
        if candidates.peek().is_none() {
            return Err(ConflictError::UnsupportedStrategy {
                strategy: name.clone(),
            });
        }
        let Some(chosen) = candidates.find(|c| c.applies(conflict)) else {
            return Err(ConflictError::ConditionNotMet {
                strategy: name.clone(),
                conflict_type: conflict.conflict_type.to_string(),
            });
        };

        let mut resolution = match &chosen.strategy {
            ResolutionStrategy::Named(delegate) => match self.registry.custom.get(delegate) {
                Some(resolver) => run_custom(delegate, resolver, conflict)?,
                None => {
                    return Err(ConflictError::UnsupportedStrategy {
                        strategy: delegate.clone(),
                    })
                }
            },
            builtin => apply_builtin(builtin, conflict, taken)?,
        };
        resolution.strategy = name.clone();
        let mut metadata = resolution.metadata.take().unwrap_or_else(|| json!({}));
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("delegate".to_string(), json!(chosen.strategy.name()));
        }
        Ok(resolution.with_metadata(metadata))
    }
}

fn run_custom(
    name: &str,
    resolver: &ResolverFn,
    conflict: &DataConflict,
) -> ConflictResult<ConflictResolution> {
    let outcome = catch_unwind(AssertUnwindSafe(|| resolver(conflict)))
        .unwrap_or_else(|payload| Err(format!("resolver panicked: {}", panic_message(payload))));
    outcome
        .map(|item| ConflictResolution::resolved(name, item, "custom_resolved"))
        .map_err(|reason| ConflictError::ResolverFailed {
            resolver: name.to_string(),
            reason,
        })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub(crate) fn fail(
    strategy: &ResolutionStrategy,
    conflict: &DataConflict,
    error: ConflictError,
) -> ConflictResolution {
    warn!(
        strategy = %strategy,
        conflict_type = %conflict.conflict_type,
        field = %conflict.field,
        error = %error,
        "conflict resolution failed; keeping existing record"
    );
    ConflictResolution::failed(strategy.name(), conflict, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::model::{ConflictSeverity, ConflictType};

    fn conflict(conflict_type: ConflictType) -> DataConflict {
        DataConflict {
            conflict_type,
            field: "name".to_string(),
            existing_value: json!("old"),
            incoming_value: json!("new"),
            severity: ConflictSeverity::Minor,
            existing_item: json!({"id": "a", "name": "old", "editor": "kim"}),
            incoming_item: json!({"id": "a", "name": "new"}),
        }
    }

    #[test]
    fn test_custom_resolver_used_for_unknown_name() {
        let mut resolver = ConflictResolver::new();
        resolver.add_custom_resolver("keep_editor", |c| {
            let mut item = c.incoming_item.clone();
            item["editor"] = c.existing_item["editor"].clone();
            Ok(item)
        });
        let r = resolver.resolve_conflict(&conflict(ConflictType::Data), &"keep_editor".into());
        assert!(r.success);
        assert_eq!(r.action, "custom_resolved");
        assert_eq!(r.resolved_item, json!({"id": "a", "name": "new", "editor": "kim"}));
    }

    #[test]
    fn test_failing_custom_resolver_falls_back_to_existing() {
        let mut resolver = ConflictResolver::new();
        resolver.add_custom_resolver("always_fails", |_| Err("no editor".to_string()));
        let c = conflict(ConflictType::Data);
        let r = resolver.resolve_conflict(&c, &"always_fails".into());
        assert!(!r.success);
        assert_eq!(r.resolved_item, c.existing_item);
        assert!(r.error.unwrap().contains("no editor"));
    }

    #[test]
    fn test_panicking_custom_resolver_falls_back_to_existing() {
        let mut resolver = ConflictResolver::new();
        resolver.add_custom_resolver("explodes", |_| panic!("timeline corrupted"));
        let c = conflict(ConflictType::Data);
        let r = resolver.resolve_conflict(&c, &"explodes".into());
        assert!(!r.success);
        assert_eq!(r.resolved_item, c.existing_item);
        assert!(r.error.unwrap().contains("timeline corrupted"));
    }

    #[test]
    fn test_conditional_strategy_requires_condition() {
        let mut resolver = ConflictResolver::new();
        resolver.add_conditional_strategy(ConditionalStrategy::new(
            "data_overwrite",
            |c| c.conflict_type == ConflictType::Data,
            ResolutionStrategy::Overwrite,
        ));

        let r = resolver
            .try_resolve_conflict(&conflict(ConflictType::Data), &"data_overwrite".into())
            .unwrap();
        assert_eq!(r.strategy, "data_overwrite");
        assert_eq!(r.resolved_item["name"], json!("new"));
        assert_eq!(r.metadata.unwrap()["delegate"], json!("overwrite"));

        let err = resolver
            .try_resolve_conflict(&conflict(ConflictType::Timestamp), &"data_overwrite".into())
            .unwrap_err();
        assert!(matches!(err, ConflictError::ConditionNotMet { .. }));
    }

    #[test]
    fn test_unknown_strategy_is_unsupported() {
        let resolver = ConflictResolver::new();
        let err = resolver
            .try_resolve_conflict(&conflict(ConflictType::Data), &"coin_flip".into())
            .unwrap_err();
        assert_eq!(
            err,
            ConflictError::UnsupportedStrategy {
                strategy: "coin_flip".to_string()
            }
        );
    }

    #[test]
    fn test_clone_does_not_share_registrations() {
        let base = ConflictResolver::new();
        let mut extended = base.clone();
        extended.add_custom_resolver("noop", |c| Ok(c.existing_item.clone()));
        let c = conflict(ConflictType::Data);
        assert!(extended.resolve_conflict(&c, &"noop".into()).success);
        assert!(!base.resolve_conflict(&c, &"noop".into()).success);
    }

    #[test]
    fn test_tracked_fields_are_configurable() {
        let resolver = ConflictResolver::new().with_tracked_fields(["metadata.difficulty"]);
        let existing = json!({"id": "a", "name": "x", "metadata": {"difficulty": "beginner"}});
        let incoming = json!({"id": "a", "name": "y", "metadata": {"difficulty": "advanced"}});
        let conflicts = resolver.detect_conflicts(&[incoming], &[existing]);
        let data: Vec<&str> = conflicts
            .iter()
            .filter(|c| c.conflict_type == ConflictType::Data)
            .map(|c| c.field.as_str())
            .collect();
        assert_eq!(data, vec!["metadata.difficulty"]);
    }
}

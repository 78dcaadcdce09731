//! Dependency planning over pipeline declarations.
//!
//! A declaration `B { depends_on: [A] }` means A must finish before B starts.
//! Planning rejects duplicates, unknown dependencies and cycles before any
//! ordering is produced.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::orchestration::error::{OrchestrationError, OrchestrationResult};

/// A pipeline's identity and what it waits for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineDeclaration {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl PipelineDeclaration {
    pub fn new<I, S>(id: impl Into<String>, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        }
    }

    /// A declaration with no dependencies.
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
        }
    }
}

/// A validated, cycle-free execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Dependencies before dependents; ties follow declaration order.
    pub execution_order: Vec<String>,
    /// Successive ready sets. Every member of a group depends only on
    /// members of earlier groups.
    pub parallel_groups: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.execution_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.execution_order.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Build the plan for `declarations`.
pub fn create_execution_plan(
    declarations: &[PipelineDeclaration],
) -> OrchestrationResult<ExecutionPlan> {
    let index = index_declarations(declarations)?;
    detect_cycle(declarations, &index)?;
    Ok(ExecutionPlan {
        execution_order: topological_order(declarations, &index),
        parallel_groups: parallel_groups(declarations),
    })
}

fn index_declarations(
    declarations: &[PipelineDeclaration],
) -> OrchestrationResult<HashMap<&str, &PipelineDeclaration>> {
    let mut index = HashMap::with_capacity(declarations.len());
    for decl in declarations {
        if index.insert(decl.id.as_str(), decl).is_some() {
            return Err(OrchestrationError::DuplicatePipeline {
                pipeline: decl.id.clone(),
            });
        }
    }
    for decl in declarations {
        if let Some(missing) = decl
            .depends_on
            .iter()
            .find(|d| !index.contains_key(d.as_str()))
        {
            return Err(OrchestrationError::UnknownDependency {
                pipeline: decl.id.clone(),
                dependency: missing.clone(),
            });
        }
    }
    Ok(index)
}

/// DFS with a visiting marker. The reported cycle runs from the revisited
/// pipeline along the current path.
fn detect_cycle<'a>(
    declarations: &'a [PipelineDeclaration],
    index: &HashMap<&'a str, &'a PipelineDeclaration>,
) -> OrchestrationResult<()> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();
    for decl in declarations {
        if let Some(cycle) = dfs_cycle(decl.id.as_str(), index, &mut marks, &mut path) {
            return Err(OrchestrationError::DependencyCycle { pipelines: cycle });
        }
    }
    Ok(())
}

fn dfs_cycle<'a>(
    node: &'a str,
    index: &HashMap<&'a str, &'a PipelineDeclaration>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    match marks.get(node) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            return Some(path[start..].iter().map(|s| s.to_string()).collect());
        }
        None => {}
    }

    marks.insert(node, Mark::Visiting);
    path.push(node);
    if let Some(decl) = index.get(node).copied() {
        for dep in &decl.depends_on {
            if let Some(cycle) = dfs_cycle(dep.as_str(), index, marks, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    marks.insert(node, Mark::Done);
    None
}

/// Post-order DFS in declaration order; dependencies are emitted first.
fn topological_order<'a>(
    declarations: &'a [PipelineDeclaration],
    index: &HashMap<&'a str, &'a PipelineDeclaration>,
) -> Vec<String> {
    fn visit<'a>(
        node: &'a str,
        index: &HashMap<&'a str, &'a PipelineDeclaration>,
        seen: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if !seen.insert(node) {
            return;
        }
        if let Some(decl) = index.get(node).copied() {
            for dep in &decl.depends_on {
                visit(dep.as_str(), index, seen, order);
            }
        }
        order.push(node.to_string());
    }

    let mut seen = HashSet::new();
    let mut order = Vec::with_capacity(declarations.len());
    for decl in declarations {
        visit(decl.id.as_str(), index, &mut seen, &mut order);
    }
    order
}

/// Level-by-level ready sets, members in declaration order. Assumes the
/// graph is acyclic and closed.
fn parallel_groups(declarations: &[PipelineDeclaration]) -> Vec<Vec<String>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();
    while placed.len() < declarations.len() {
        let ready: Vec<&str> = declarations
            .iter()
            .filter(|d| !placed.contains(d.id.as_str()))
            .filter(|d| d.depends_on.iter().all(|dep| placed.contains(dep.as_str())))
            .map(|d| d.id.as_str())
            .collect();
        if ready.is_empty() {
            break;
        }
        placed.extend(ready.iter().copied());
        groups.push(ready.into_iter().map(str::to_string).collect());
    }
    groups
}

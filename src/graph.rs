//! Dependency graph
//!
//! Indexes resources by action ID, draws edges from `requires`
//! declarations and produces a deterministic topological execution
//! order pruned to the transitive predecessors of the target.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult};
use crate::workflow::Workflow;

/// Dependency graph over a workflow's resources
#[derive(Debug)]
pub struct DependencyGraph {
    /// Action IDs in document order
    ids: Vec<String>,
    /// action_id → document index
    index: HashMap<String, usize>,
    /// Edges as dependency → dependents, by index
    dependents: Vec<Vec<usize>>,
    /// requires edges, by index
    requires: Vec<Vec<usize>>,
    /// Full topological order, by index
    topo: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicate IDs, unknown dependencies
    /// and cycles
    pub fn build(workflow: &Workflow) -> EngineResult<Self> {
        let mut ids = Vec::with_capacity(workflow.resources.len());
        let mut index = HashMap::new();
        for (i, resource) in workflow.resources.iter().enumerate() {
            if index.insert(resource.action_id.clone(), i).is_some() {
                return Err(EngineError::Graph(format!(
                    "duplicate action id '{}'",
                    resource.action_id
                )));
            }
            ids.push(resource.action_id.clone());
        }

        let n = workflow.resources.len();
        let mut dependents = vec![Vec::new(); n];
        let mut requires = vec![Vec::new(); n];
        for (i, resource) in workflow.resources.iter().enumerate() {
            for dep in &resource.requires {
                let Some(&dep_idx) = index.get(dep) else {
                    return Err(EngineError::Graph(format!(
                        "resource '{}' requires unknown dependency '{}'",
                        resource.action_id, dep
                    )));
                };
                dependents[dep_idx].push(i);
                requires[i].push(dep_idx);
            }
        }

        let topo = kahn_sort(n, &requires, &dependents, &ids)?;

        Ok(Self {
            ids,
            index,
            dependents,
            requires,
            topo,
        })
    }

    /// Action IDs in full topological order
    pub fn topological_order(&self) -> Vec<&str> {
        self.topo.iter().map(|&i| self.ids[i].as_str()).collect()
    }

    /// Execution order for a target: its transitive predecessors plus
    /// the target itself, topologically ordered
    pub fn execution_order(&self, target: &str) -> EngineResult<Vec<&str>> {
        let Some(&target_idx) = self.index.get(target) else {
            return Err(EngineError::Graph(format!(
                "unknown target action '{}'",
                target
            )));
        };

        let mut needed = HashSet::new();
        let mut stack = vec![target_idx];
        while let Some(node) = stack.pop() {
            if needed.insert(node) {
                stack.extend(self.requires[node].iter().copied());
            }
        }

        Ok(self
            .topo
            .iter()
            .filter(|i| needed.contains(i))
            .map(|&i| self.ids[i].as_str())
            .collect())
    }

    /// Direct dependents of an action
    pub fn dependents_of(&self, action_id: &str) -> Vec<&str> {
        self.index
            .get(action_id)
            .map(|&i| {
                self.dependents[i]
                    .iter()
                    .map(|&d| self.ids[d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Kahn's algorithm with a deterministic tiebreak: among ready nodes,
/// the one earliest in document order runs first
fn kahn_sort(
    n: usize,
    requires: &[Vec<usize>],
    dependents: &[Vec<usize>],
    ids: &[String],
) -> EngineResult<Vec<usize>> {
    let mut in_degree: Vec<usize> = requires.iter().map(|r| r.len()).collect();
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while !ready.is_empty() {
        ready.sort_unstable_by(|a, b| b.cmp(a));
        let node = ready.pop().unwrap_or_default();
        order.push(node);
        for &dep in &dependents[node] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                ready.push(dep);
            }
        }
    }

    if order.len() != n {
        let mut cyclic: Vec<&str> = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| ids[i].as_str())
            .collect();
        cyclic.sort_unstable();
        return Err(EngineError::Graph(format!(
            "dependency cycle involving: {}",
            cyclic.join(", ")
        )));
    }

    Ok(order)
}

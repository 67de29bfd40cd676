use crate::{EngineError, MigrationNode};
use migraph_history::NodeId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Migration nodes plus the reverse-dependency index derived from them.
///
/// Insertion order is kept and drives every deterministic tie-break in
/// scheduling. Dependencies are not resolved on insert; see
/// [`MigrationGraph::unresolved_dependencies`].
#[derive(Debug, Default)]
pub struct MigrationGraph {
    nodes: Vec<Arc<MigrationNode>>,
    index: BTreeMap<NodeId, usize>,
    dependents: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl MigrationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: MigrationNode) -> Result<(), EngineError> {
        if self.index.contains_key(node.id()) {
            return Err(EngineError::DuplicateNode(node.id().clone()));
        }
        for dependency in node.dependencies() {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(node.id().clone());
        }
        self.index.insert(node.id().clone(), self.nodes.len());
        self.nodes.push(Arc::new(node));
        Ok(())
    }

    /// Nodes in insertion order. Each call starts a fresh pass.
    pub fn all_nodes(&self) -> impl Iterator<Item = &Arc<MigrationNode>> + '_ {
        self.nodes.iter()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Arc<MigrationNode>> {
        self.index.get(id).map(|position| &self.nodes[*position])
    }

    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependents of `id`; empty when `id` is not in the graph.
    pub fn get_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        if !self.contains(id) {
            return BTreeSet::new();
        }
        self.dependents
            .get(id)
            .map(|dependents| {
                dependents
                    .iter()
                    .filter(|dependent| self.contains(dependent))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn roots(&self) -> Vec<Arc<MigrationNode>> {
        self.nodes
            .iter()
            .filter(|node| node.dependencies().is_empty())
            .cloned()
            .collect()
    }

    /// Every node that transitively depends on `id`, excluding `id`.
    pub fn all_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        self.closure(id, |current| self.get_dependents(current))
    }

    /// Every node `id` transitively depends on, excluding `id`. Ids that do
    /// not resolve are left out.
    pub fn all_dependencies(&self, id: &NodeId) -> BTreeSet<NodeId> {
        self.closure(id, |current| {
            self.get(current)
                .map(|node| {
                    node.dependencies()
                        .iter()
                        .filter(|dependency| self.contains(dependency))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// `(node, dependency)` pairs whose dependency is missing, in insertion
    /// order.
    pub fn unresolved_dependencies(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.dependencies()
                    .iter()
                    .filter(|dependency| !self.contains(dependency))
                    .map(|dependency| (node.id().clone(), dependency.clone()))
            })
            .collect()
    }

    pub fn ensure_resolved(&self) -> Result<(), EngineError> {
        match self.unresolved_dependencies().into_iter().next() {
            Some((node_id, dependency)) => Err(EngineError::UnresolvedDependency {
                node_id,
                dependency,
            }),
            None => Ok(()),
        }
    }

    fn closure<F>(&self, start: &NodeId, next: F) -> BTreeSet<NodeId>
    where
        F: Fn(&NodeId) -> BTreeSet<NodeId>,
    {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(current) = queue.pop_front() {
            for neighbour in next(&current) {
                if neighbour != *start && seen.insert(neighbour.clone()) {
                    queue.push_back(neighbour);
                }
            }
        }
        seen
    }
}

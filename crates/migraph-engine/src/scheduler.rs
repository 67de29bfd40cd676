use crate::{EngineError, MigrationGraph, MigrationNode};
use migraph_history::NodeId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Nodes with no dependencies among each other. Order inside a level follows
/// graph insertion order but carries no execution guarantee.
#[derive(Clone, Debug)]
pub struct ExecutionLevel {
    level_number: usize,
    nodes: Vec<Arc<MigrationNode>>,
}

impl ExecutionLevel {
    pub fn level_number(&self) -> usize {
        self.level_number
    }

    pub fn nodes(&self) -> &[Arc<MigrationNode>] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    levels: Vec<ExecutionLevel>,
}

impl ExecutionPlan {
    pub fn levels(&self) -> &[ExecutionLevel] {
        &self.levels
    }

    pub fn total_nodes(&self) -> usize {
        self.levels.iter().map(ExecutionLevel::len).sum()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Size of the widest level.
    pub fn max_parallelism(&self) -> usize {
        self.levels.iter().map(ExecutionLevel::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Levels flattened in forward order.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &Arc<MigrationNode>> + '_ {
        self.levels.iter().flat_map(|level| level.nodes.iter())
    }

    pub fn level_of(&self, id: &NodeId) -> Option<usize> {
        self.levels
            .iter()
            .find(|level| level.nodes.iter().any(|node| node.id() == id))
            .map(ExecutionLevel::level_number)
    }
}

/// Levels every node of the graph.
pub fn schedule(graph: &MigrationGraph) -> Result<ExecutionPlan, EngineError> {
    let members = graph
        .all_nodes()
        .map(|node| node.id().clone())
        .collect::<BTreeSet<_>>();
    schedule_subset(graph, &members)
}

/// Levels only `members`; dependencies outside the subset count as
/// satisfied. Every member must exist and its dependencies must resolve in
/// the graph.
pub fn schedule_subset(
    graph: &MigrationGraph,
    members: &BTreeSet<NodeId>,
) -> Result<ExecutionPlan, EngineError> {
    let mut selected = Vec::with_capacity(members.len());
    for id in members {
        let node = graph
            .get(id)
            .ok_or_else(|| EngineError::UnknownNode(id.clone()))?;
        if let Some(dependency) = node
            .dependencies()
            .iter()
            .find(|dependency| !graph.contains(dependency))
        {
            return Err(EngineError::UnresolvedDependency {
                node_id: id.clone(),
                dependency: dependency.clone(),
            });
        }
        selected.push(node);
    }
    selected.sort_by_key(|node| graph.position(node.id()));

    let mut in_degree = selected
        .iter()
        .map(|node| {
            let count = node
                .dependencies()
                .iter()
                .filter(|dependency| members.contains(*dependency))
                .count();
            (node.id().clone(), count)
        })
        .collect::<BTreeMap<_, _>>();

    let mut current = selected
        .iter()
        .filter(|node| in_degree.get(node.id()) == Some(&0))
        .map(|node| Arc::clone(*node))
        .collect::<Vec<_>>();
    let mut levels = Vec::new();
    let mut placed = 0usize;

    while !current.is_empty() {
        let mut ready = BTreeMap::new();
        for node in &current {
            for dependent in graph.get_dependents(node.id()) {
                let Some(degree) = in_degree.get_mut(&dependent) else {
                    continue;
                };
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    if let Some(position) = graph.position(&dependent) {
                        ready.insert(position, dependent);
                    }
                }
            }
        }

        placed += current.len();
        levels.push(ExecutionLevel {
            level_number: levels.len(),
            nodes: current,
        });
        current = ready
            .values()
            .filter_map(|id| graph.get(id).cloned())
            .collect();
    }

    if placed < selected.len() {
        let remaining = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| id.clone())
            .collect::<BTreeSet<_>>();
        let cycle = find_cycle(graph, &selected, &remaining);
        return Err(EngineError::CyclicDependency { cycle });
    }

    tracing::debug!(
        levels = levels.len(),
        nodes = placed,
        "execution plan scheduled"
    );
    Ok(ExecutionPlan { levels })
}

/// Follows unplaced dependencies from the earliest unplaced node until a
/// node repeats. Every unplaced node has at least one unplaced dependency.
fn find_cycle(
    graph: &MigrationGraph,
    selected: &[&Arc<MigrationNode>],
    remaining: &BTreeSet<NodeId>,
) -> Vec<NodeId> {
    let Some(start) = selected.iter().find(|node| remaining.contains(node.id())) else {
        return Vec::new();
    };

    let mut path: Vec<NodeId> = Vec::new();
    let mut current = start.id().clone();
    loop {
        if let Some(first) = path.iter().position(|id| *id == current) {
            let mut cycle = path.split_off(first);
            cycle.push(current);
            return cycle;
        }
        path.push(current.clone());
        let next = graph.get(&current).and_then(|node| {
            node.dependencies()
                .iter()
                .filter(|dependency| remaining.contains(*dependency))
                .min_by_key(|dependency| graph.position(dependency))
                .cloned()
        });
        match next {
            Some(next) => current = next,
            None => return path,
        }
    }
}

use crate::{EngineError, MigrationGraph, MigrationNode, RollbackScope, SharedTask, schedule};
use migraph_history::{HistoryStore, NodeId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Nodes to roll back, in execution order.
///
/// The order is the forward schedule (levels in order, insertion order inside
/// a level) reversed, so every dependent is undone before what it depends
/// on, and independent branches unwind deterministically. Only nodes that
/// are currently applied are included.
pub async fn plan_rollback(
    graph: &MigrationGraph,
    history: &dyn HistoryStore,
    scope: &RollbackScope,
) -> Result<Vec<Arc<MigrationNode>>, EngineError> {
    let plan = schedule(graph)?;

    let in_scope: Option<BTreeSet<NodeId>> = match scope {
        RollbackScope::All => None,
        RollbackScope::Target(target) => {
            let node = graph
                .get(target)
                .ok_or_else(|| EngineError::UnknownNode(target.clone()))?;
            if !history
                .was_executed(node.id(), node.environment_id())
                .await?
            {
                return Err(EngineError::RollbackTargetNotApplied(target.clone()));
            }
            let mut members = graph.all_dependents(target);
            members.insert(target.clone());
            Some(members)
        }
    };

    let forward = plan.ordered_nodes().cloned().collect::<Vec<_>>();
    let mut ordered = Vec::new();
    for node in forward.into_iter().rev() {
        if in_scope
            .as_ref()
            .is_some_and(|members| !members.contains(node.id()))
        {
            continue;
        }
        if history
            .was_executed(node.id(), node.environment_id())
            .await?
        {
            ordered.push(node);
        }
    }

    tracing::debug!(nodes = ordered.len(), "rollback planned");
    Ok(ordered)
}

/// Down task for `node`: rebuilt from the captured inverse payload when the
/// node can restore one, otherwise its static down task.
pub(crate) fn resolve_down_task(
    node: &MigrationNode,
    inverse_payload: Option<&str>,
) -> Result<SharedTask, String> {
    if let (Some(payload), Some(restorer)) = (inverse_payload, node.restorer()) {
        return restorer
            .restore(payload)
            .map_err(|error| format!("cannot restore down task: {error}"));
    }
    node.down_task()
        .cloned()
        .ok_or_else(|| "no inverse action available for rollback".to_string())
}

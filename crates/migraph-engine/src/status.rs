use crate::{EngineError, MigrationGraph};
use migraph_history::{
    EnvironmentId, ExecutionRecord, HistoryStore, NodeId, is_applied, latest_record,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeState {
    pub node_id: NodeId,
    pub name: String,
    pub environment_id: EnvironmentId,
    pub applied: bool,
    pub latest: Option<ExecutionRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub nodes: Vec<NodeState>,
}

impl StatusReport {
    pub fn applied_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.applied).count()
    }

    pub fn pending_count(&self) -> usize {
        self.nodes.len() - self.applied_count()
    }
}

/// Applied/pending state of every graph node, in insertion order.
pub async fn collect_status(
    graph: &MigrationGraph,
    history: &dyn HistoryStore,
) -> Result<StatusReport, EngineError> {
    let mut records_by_environment: BTreeMap<EnvironmentId, Vec<ExecutionRecord>> =
        BTreeMap::new();
    let mut nodes = Vec::with_capacity(graph.size());
    for node in graph.all_nodes() {
        let environment_id = node.environment_id();
        if !records_by_environment.contains_key(environment_id) {
            let records = history.all_records(environment_id).await?;
            records_by_environment.insert(environment_id.clone(), records);
        }
        let records = records_by_environment
            .get(environment_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        nodes.push(NodeState {
            node_id: node.id().clone(),
            name: node.name().to_string(),
            environment_id: environment_id.clone(),
            applied: is_applied(records, node.id()),
            latest: latest_record(records, node.id()).cloned(),
        });
    }
    Ok(StatusReport { nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_node;
    use migraph_history::MemoryHistoryStore;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn collect_status_mixed_history_expected_counts() {
        let mut graph = MigrationGraph::new();
        graph.add_node(test_node("a", &[])).expect("add a");
        graph.add_node(test_node("b", &["a"])).expect("add b");
        let history = MemoryHistoryStore::new();
        history
            .record(ExecutionRecord::up_success(
                NodeId::new("a").expect("node id"),
                EnvironmentId::new("db1").expect("environment id"),
                "a",
                None,
                Duration::ZERO,
            ))
            .await
            .expect("record should succeed");

        let report = collect_status(&graph, &history)
            .await
            .expect("status should collect");
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.pending_count(), 1);
        assert!(report.nodes[0].applied);
        assert!(report.nodes[0].latest.is_some());
        assert!(report.nodes[1].latest.is_none());
    }
}

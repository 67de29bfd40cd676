use crate::{ExecutionSummary, MigrationNode};
use migraph_history::{ExecutionDirection, NodeId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// What a run is about to do, reported before the first task starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionPlanInfo {
    pub direction: ExecutionDirection,
    /// For DOWN runs every node is its own level, in rollback order.
    pub levels: Vec<Vec<NodeId>>,
    pub applied: BTreeSet<NodeId>,
    pub total_nodes: usize,
    pub dry_run: bool,
}

impl ExecutionPlanInfo {
    /// Nodes the run will actually invoke.
    pub fn pending_nodes(&self) -> Vec<&NodeId> {
        self.levels
            .iter()
            .flatten()
            .filter(|id| match self.direction {
                ExecutionDirection::Up => !self.applied.contains(*id),
                ExecutionDirection::Down => self.applied.contains(*id),
            })
            .collect()
    }
}

/// Progress sink for UI layers. Implementations must not panic; every
/// method defaults to doing nothing.
pub trait ExecutionListener: Send + Sync {
    fn on_plan_created(&self, _info: &ExecutionPlanInfo) {}

    fn on_node_started(&self, _node: &MigrationNode, _direction: ExecutionDirection) {}

    fn on_node_succeeded(
        &self,
        _node: &MigrationNode,
        _direction: ExecutionDirection,
        _duration_ms: u64,
    ) {
    }

    fn on_node_skipped(
        &self,
        _node: &MigrationNode,
        _direction: ExecutionDirection,
        _reason: &str,
    ) {
    }

    fn on_node_failed(
        &self,
        _node: &MigrationNode,
        _direction: ExecutionDirection,
        _raw_content: Option<&str>,
        _message: &str,
    ) {
    }

    fn on_completed(&self, _summary: &ExecutionSummary) {}
}

pub type SharedExecutionListener = Arc<dyn ExecutionListener>;

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl ExecutionListener for NoopListener {}

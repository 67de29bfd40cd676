use crate::Diagnostic;
use migraph_history::{HistoryError, IdError, NodeId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),
    #[error("node '{0}' depends on itself")]
    SelfDependency(NodeId),
    #[error("node '{node_id}' depends on unknown node '{dependency}'")]
    UnresolvedDependency { node_id: NodeId, dependency: NodeId },
    #[error("cyclic dependency detected: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<NodeId> },
    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),
    #[error("rollback target '{0}' has not been applied")]
    RollbackTargetNotApplied(NodeId),
    #[error("no plugin registered for type '{plugin_type}' (available: {})", .available.join(", "))]
    PluginNotFound {
        plugin_type: String,
        available: Vec<String>,
    },
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

fn format_cycle(cycle: &[NodeId]) -> String {
    cycle
        .iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Error, Clone)]
#[error("validation failed with {errors_count} error(s)")]
pub struct ValidationError {
    pub diagnostics: Vec<Diagnostic>,
    pub errors_count: usize,
}

impl ValidationError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        let errors_count = diagnostics.iter().filter(|d| d.is_error()).count();
        Self {
            diagnostics,
            errors_count,
        }
    }
}

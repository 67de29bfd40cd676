use crate::types::{EnvironmentId, ExecutionDirection, ExecutionRecord, NodeId};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("invalid execution record: {0}")]
    InvalidRecord(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Append-only audit log of execution attempts, partitioned by environment.
///
/// Implementations must serialize writes per environment; callers may share
/// one store across concurrently executing nodes.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Prepares backing storage. Safe to call any number of times.
    async fn initialize(&self) -> HistoryResult<()>;

    async fn record(&self, record: ExecutionRecord) -> HistoryResult<()>;

    /// True when the node is currently applied, see [`is_applied`].
    async fn was_executed(
        &self,
        node_id: &NodeId,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<bool>;

    /// Ids of UP success records whose node is still applied, in record
    /// order. A node applied more than once appears more than once.
    async fn executed_nodes(&self, environment_id: &EnvironmentId) -> HistoryResult<Vec<NodeId>>;

    async fn find_latest_record(
        &self,
        node_id: &NodeId,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<Option<ExecutionRecord>>;

    /// Full chronological audit trail for one environment.
    async fn all_records(
        &self,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<Vec<ExecutionRecord>>;
}

pub type SharedHistoryStore = Arc<dyn HistoryStore>;

/// Latest record for `node_id` by timestamp; equal timestamps resolve to the
/// one appended last.
pub fn latest_record<'a>(
    records: &'a [ExecutionRecord],
    node_id: &NodeId,
) -> Option<&'a ExecutionRecord> {
    latest_matching(records, |record| record.node_id() == node_id)
}

/// Latest UP success for `node_id`, the record that carries the inverse
/// payload used for rollback.
pub fn latest_applied_record<'a>(
    records: &'a [ExecutionRecord],
    node_id: &NodeId,
) -> Option<&'a ExecutionRecord> {
    latest_matching(records, |record| {
        record.node_id() == node_id && record.is_success() && record.is_up()
    })
}

/// A node is applied when its most recent SUCCESS record, in either
/// direction, is an UP. FAILURE and SKIPPED records never change the state.
pub fn is_applied(records: &[ExecutionRecord], node_id: &NodeId) -> bool {
    latest_matching(records, |record| {
        record.node_id() == node_id && record.is_success()
    })
    .is_some_and(|record| record.direction() == ExecutionDirection::Up)
}

fn latest_matching<F>(records: &[ExecutionRecord], predicate: F) -> Option<&ExecutionRecord>
where
    F: Fn(&ExecutionRecord) -> bool,
{
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| predicate(record))
        .max_by_key(|(position, record)| (record.executed_at_ms(), *position))
        .map(|(_, record)| record)
}

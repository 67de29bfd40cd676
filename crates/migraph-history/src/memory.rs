use crate::store::{HistoryError, HistoryResult, HistoryStore, is_applied, latest_record};
use crate::types::{EnvironmentId, ExecutionRecord, NodeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub(crate) struct HistoryState {
    pub schema_version: u32,
    pub records: BTreeMap<EnvironmentId, Vec<ExecutionRecord>>,
}

impl Default for HistoryState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl HistoryState {
    fn environment(&self, environment_id: &EnvironmentId) -> &[ExecutionRecord] {
        self.records
            .get(environment_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// In-process history keyed by environment. Nothing survives the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<Mutex<HistoryState>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: HistoryState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn snapshot(&self) -> HistoryResult<HistoryState> {
        Ok(self.lock()?.clone())
    }

    pub(crate) fn append(&self, record: ExecutionRecord) -> HistoryResult<()> {
        let mut state = self.lock()?;
        tracing::debug!(
            node_id = %record.node_id(),
            environment = %record.environment_id(),
            direction = %record.direction(),
            status = %record.status(),
            "history record appended"
        );
        state
            .records
            .entry(record.environment_id().clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn lock(&self) -> HistoryResult<MutexGuard<'_, HistoryState>> {
        self.inner
            .lock()
            .map_err(|_| HistoryError::Backend("memory history mutex poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn initialize(&self) -> HistoryResult<()> {
        Ok(())
    }

    async fn record(&self, record: ExecutionRecord) -> HistoryResult<()> {
        self.append(record)
    }

    async fn was_executed(
        &self,
        node_id: &NodeId,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<bool> {
        let state = self.lock()?;
        Ok(is_applied(state.environment(environment_id), node_id))
    }

    async fn executed_nodes(&self, environment_id: &EnvironmentId) -> HistoryResult<Vec<NodeId>> {
        let state = self.lock()?;
        let records = state.environment(environment_id);
        Ok(records
            .iter()
            .filter(|record| record.is_up() && record.is_success())
            .filter(|record| is_applied(records, record.node_id()))
            .map(|record| record.node_id().clone())
            .collect())
    }

    async fn find_latest_record(
        &self,
        node_id: &NodeId,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<Option<ExecutionRecord>> {
        let state = self.lock()?;
        Ok(latest_record(state.environment(environment_id), node_id).cloned())
    }

    async fn all_records(
        &self,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<Vec<ExecutionRecord>> {
        let state = self.lock()?;
        Ok(state.environment(environment_id).to_vec())
    }
}

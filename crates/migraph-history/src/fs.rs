use crate::memory::{HistoryState, MemoryHistoryStore, SCHEMA_VERSION};
use crate::store::{HistoryError, HistoryResult, HistoryStore};
use crate::types::{EnvironmentId, ExecutionRecord, NodeId};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// History persisted as a single JSON document. Every append rewrites the
/// file through a temporary sibling and a rename.
#[derive(Clone, Debug)]
pub struct FsHistoryStore {
    path: PathBuf,
    inner: MemoryHistoryStore,
    write_lock: Arc<Mutex<()>>,
}

impl FsHistoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> HistoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = fs::read(&path).map_err(|err| {
                HistoryError::Backend(format!(
                    "read history file '{}' failed: {err}",
                    path.display()
                ))
            })?;
            let state = serde_json::from_slice::<HistoryState>(&raw)
                .map_err(|err| HistoryError::Serialization(err.to_string()))?;
            if state.schema_version != SCHEMA_VERSION {
                return Err(HistoryError::InvalidInput(format!(
                    "history file '{}' has unsupported schema version {}",
                    path.display(),
                    state.schema_version
                )));
            }
            state
        } else {
            HistoryState::default()
        };

        Ok(Self {
            path,
            inner: MemoryHistoryStore::from_state(state),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &HistoryState) -> HistoryResult<()> {
        let raw = serde_json::to_vec_pretty(state)
            .map_err(|err| HistoryError::Serialization(err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .map_err(|err| HistoryError::Backend(format!("write history file failed: {err}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| HistoryError::Backend(format!("rename history file failed: {err}")))?;
        Ok(())
    }

    /// The in-memory view only takes the record once the file holds it, so
    /// a failed write leaves both unchanged.
    fn append_and_persist(&self, record: ExecutionRecord) -> HistoryResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| HistoryError::Backend("fs history write lock poisoned".to_string()))?;
        let mut next = self.inner.snapshot()?;
        next.records
            .entry(record.environment_id().clone())
            .or_default()
            .push(record.clone());
        self.persist(&next)?;
        self.inner.append(record)
    }
}

#[async_trait::async_trait]
impl HistoryStore for FsHistoryStore {
    async fn initialize(&self) -> HistoryResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                HistoryError::Backend(format!(
                    "create history directory '{}' failed: {err}",
                    parent.display()
                ))
            })?;
        }
        if !self.path.exists() {
            let _guard = self
                .write_lock
                .lock()
                .map_err(|_| HistoryError::Backend("fs history write lock poisoned".to_string()))?;
            self.persist(&self.inner.snapshot()?)?;
        }
        Ok(())
    }

    async fn record(&self, record: ExecutionRecord) -> HistoryResult<()> {
        self.append_and_persist(record)
    }

    async fn was_executed(
        &self,
        node_id: &NodeId,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<bool> {
        self.inner.was_executed(node_id, environment_id).await
    }

    async fn executed_nodes(&self, environment_id: &EnvironmentId) -> HistoryResult<Vec<NodeId>> {
        self.inner.executed_nodes(environment_id).await
    }

    async fn find_latest_record(
        &self,
        node_id: &NodeId,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<Option<ExecutionRecord>> {
        self.inner.find_latest_record(node_id, environment_id).await
    }

    async fn all_records(
        &self,
        environment_id: &EnvironmentId,
    ) -> HistoryResult<Vec<ExecutionRecord>> {
        self.inner.all_records(environment_id).await
    }
}

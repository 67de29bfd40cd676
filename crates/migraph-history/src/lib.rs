pub mod fs;
pub mod memory;
pub mod store;
pub mod types;

pub use fs::FsHistoryStore;
pub use memory::MemoryHistoryStore;
pub use store::{
    HistoryError, HistoryResult, HistoryStore, SharedHistoryStore, is_applied,
    latest_applied_record, latest_record,
};
pub use types::{
    EnvironmentId, ExecutionDirection, ExecutionRecord, ExecutionStatus, IdError, NodeId,
    RecordParts, timestamp_now_ms,
};

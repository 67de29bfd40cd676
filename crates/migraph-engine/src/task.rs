use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub message: String,
    /// Serialized inverse action, persisted with the UP success record and
    /// handed back to a [`DownTaskRestorer`] at rollback time.
    pub inverse_payload: Option<String>,
}

impl TaskOutcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            inverse_payload: None,
        }
    }

    pub fn with_inverse_payload(mut self, payload: impl Into<String>) -> Self {
        self.inverse_payload = Some(payload.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self) -> Result<TaskOutcome, TaskError>;

    fn description(&self) -> String;

    /// Raw source of the action (a command line, a SQL script) shown when
    /// the task fails.
    fn raw_content(&self) -> Option<String> {
        None
    }
}

pub type SharedTask = Arc<dyn Task>;

/// Rebuilds a down task from the inverse payload captured at UP time.
pub trait DownTaskRestorer: Send + Sync {
    fn restore(&self, payload: &str) -> Result<SharedTask, TaskError>;
}

pub type SharedDownTaskRestorer = Arc<dyn DownTaskRestorer>;

type TaskFn = dyn Fn() -> Result<TaskOutcome, TaskError> + Send + Sync;

/// Task backed by a synchronous closure.
///
/// The closure runs on the engine's thread and never yields, so a
/// `task_timeout` cannot interrupt it. A closure that outlives the limit
/// still completes and is recorded by its own result.
#[derive(Clone)]
pub struct FnTask {
    description: String,
    run: Arc<TaskFn>,
}

impl FnTask {
    pub fn new<F>(description: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Result<TaskOutcome, TaskError> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            run: Arc::new(run),
        }
    }

    pub fn shared<F>(description: impl Into<String>, run: F) -> SharedTask
    where
        F: Fn() -> Result<TaskOutcome, TaskError> + Send + Sync + 'static,
    {
        Arc::new(Self::new(description, run))
    }
}

#[async_trait]
impl Task for FnTask {
    async fn execute(&self) -> Result<TaskOutcome, TaskError> {
        (self.run)()
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

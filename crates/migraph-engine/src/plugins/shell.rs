use super::{
    EnvironmentDefinition, EnvironmentFactory, HistoryStoreFactory, NodeFactory, PluginBundle,
    TaskDefinition,
};
use crate::{
    DownTaskRestorer, EngineError, Environment, MigrationNode, SharedEnvironment, SharedTask, Task,
    TaskError, TaskOutcome,
};
use async_trait::async_trait;
use migraph_history::{
    EnvironmentId, FsHistoryStore, MemoryHistoryStore, NodeId, SharedHistoryStore,
};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SHELL_PLUGIN_TYPE: &str = "shell";
pub const DEFAULT_HISTORY_PATH: &str = ".migraph/history.json";
pub const MEMORY_HISTORY_PATH: &str = ":memory:";

/// Runs commands with `sh -c`, optionally inside a working directory and
/// with extra environment variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellEnvironment {
    id: EnvironmentId,
    name: String,
    working_dir: Option<PathBuf>,
    vars: BTreeMap<String, String>,
    history_path: String,
}

impl ShellEnvironment {
    pub fn from_definition(
        id: EnvironmentId,
        definition: &EnvironmentDefinition,
    ) -> Result<Self, EngineError> {
        let vars = match definition.settings.get("env") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(key, value)| match value {
                    Value::String(value) => (key.clone(), value.clone()),
                    other => (key.clone(), other.to_string()),
                })
                .collect(),
            Some(other) => {
                return Err(EngineError::InvalidDefinition(format!(
                    "environment '{id}': setting 'env' must be an object, got {other}"
                )));
            }
        };
        Ok(Self {
            name: definition.name.clone().unwrap_or_else(|| id.to_string()),
            working_dir: definition.setting_str("working_dir")?.map(PathBuf::from),
            vars,
            history_path: definition
                .setting_str("history_path")?
                .unwrap_or(DEFAULT_HISTORY_PATH)
                .to_string(),
            id,
        })
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn history_path(&self) -> &str {
        &self.history_path
    }

    /// History file location; relative paths resolve against the working
    /// directory when one is set. `None` selects the in-memory store.
    pub fn resolved_history_path(&self) -> Option<PathBuf> {
        if self.history_path == MEMORY_HISTORY_PATH {
            return None;
        }
        let path = PathBuf::from(&self.history_path);
        match &self.working_dir {
            Some(dir) if path.is_relative() => Some(dir.join(path)),
            _ => Some(path),
        }
    }

    fn command(&self, command: &str, inverse: Option<String>) -> ShellTask {
        ShellTask {
            command: command.to_string(),
            working_dir: self.working_dir.clone(),
            vars: self.vars.clone(),
            inverse,
        }
    }
}

impl Environment for ShellEnvironment {
    fn id(&self) -> &EnvironmentId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellTask {
    command: String,
    working_dir: Option<PathBuf>,
    vars: BTreeMap<String, String>,
    inverse: Option<String>,
}

#[async_trait]
impl Task for ShellTask {
    async fn execute(&self) -> Result<TaskOutcome, TaskError> {
        let mut command = tokio::process::Command::new("sh");
        // A timed-out run drops this future; the command must not outlive it.
        command
            .arg("-c")
            .arg(&self.command)
            .envs(&self.vars)
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let output = command
            .output()
            .await
            .map_err(|error| TaskError::new(format!("failed to spawn sh: {error}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() { stdout } else { stderr };
            return Err(TaskError::new(if detail.is_empty() {
                format!("command exited with {}", output.status)
            } else {
                format!("command exited with {}: {detail}", output.status)
            }));
        }

        let mut outcome = TaskOutcome::new(stdout);
        outcome.inverse_payload = self.inverse.clone();
        Ok(outcome)
    }

    fn description(&self) -> String {
        self.command.clone()
    }

    fn raw_content(&self) -> Option<String> {
        Some(self.command.clone())
    }
}

/// Rebuilds the captured down command as a runnable task.
#[derive(Clone, Debug)]
pub struct ShellRestorer {
    environment: Arc<ShellEnvironment>,
}

impl DownTaskRestorer for ShellRestorer {
    fn restore(&self, payload: &str) -> Result<SharedTask, TaskError> {
        if payload.trim().is_empty() {
            return Err(TaskError::new("captured down command is blank"));
        }
        Ok(Arc::new(self.environment.command(payload, None)))
    }
}

#[derive(Debug, Default)]
pub struct ShellPlugin;

impl ShellPlugin {
    fn shell_environment(
        environment: &SharedEnvironment,
    ) -> Result<Arc<ShellEnvironment>, EngineError> {
        environment
            .as_any()
            .downcast_ref::<ShellEnvironment>()
            .map(|shell| Arc::new(shell.clone()))
            .ok_or_else(|| {
                EngineError::InvalidDefinition(format!(
                    "environment '{}' is not a shell environment",
                    environment.id()
                ))
            })
    }
}

impl EnvironmentFactory for ShellPlugin {
    fn create_environment(
        &self,
        id: EnvironmentId,
        definition: &EnvironmentDefinition,
    ) -> Result<SharedEnvironment, EngineError> {
        Ok(Arc::new(ShellEnvironment::from_definition(id, definition)?))
    }
}

impl NodeFactory for ShellPlugin {
    fn create_node(
        &self,
        id: NodeId,
        definition: &TaskDefinition,
        dependencies: BTreeSet<NodeId>,
        environment: SharedEnvironment,
    ) -> Result<MigrationNode, EngineError> {
        if definition.up.trim().is_empty() {
            return Err(EngineError::InvalidDefinition(format!(
                "task '{id}' has a blank up command"
            )));
        }
        let shell = Self::shell_environment(&environment)?;
        let down = definition
            .down
            .as_deref()
            .map(str::trim)
            .filter(|down| !down.is_empty());

        let name = definition.name.clone().unwrap_or_else(|| id.to_string());
        let up = shell.command(&definition.up, down.map(str::to_string));
        let mut builder = MigrationNode::builder(id, name, environment, Arc::new(up))
            .dependencies(dependencies);
        if let Some(description) = &definition.description {
            builder = builder.description(description.clone());
        }
        if let Some(down) = down {
            builder = builder
                .down_task(Arc::new(shell.command(down, None)))
                .restorer(Arc::new(ShellRestorer {
                    environment: Arc::clone(&shell),
                }));
        }
        builder.build()
    }
}

impl HistoryStoreFactory for ShellPlugin {
    fn create_history_store(
        &self,
        environment: &SharedEnvironment,
    ) -> Result<SharedHistoryStore, EngineError> {
        let shell = Self::shell_environment(environment)?;
        match shell.resolved_history_path() {
            None => Ok(Arc::new(MemoryHistoryStore::new())),
            Some(path) => Ok(Arc::new(FsHistoryStore::open(path)?)),
        }
    }
}

pub fn shell_bundle() -> PluginBundle {
    let plugin = Arc::new(ShellPlugin);
    PluginBundle {
        environments: plugin.clone(),
        nodes: plugin.clone(),
        history: plugin,
    }
}

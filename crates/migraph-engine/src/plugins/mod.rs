use crate::{EngineError, MigrationNode, SharedEnvironment};
use migraph_history::{EnvironmentId, NodeId, SharedHistoryStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub mod registry;
pub mod shell;

pub use registry::*;
pub use shell::*;

/// A declared execution target. `settings` is interpreted by the plugin
/// named in `plugin_type`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDefinition {
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl EnvironmentDefinition {
    pub fn setting_str(&self, key: &str) -> Result<Option<&str>, EngineError> {
        match self.settings.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(EngineError::InvalidDefinition(format!(
                "setting '{key}' must be a string, got {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub target: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub up: String,
    #[serde(default)]
    pub down: Option<String>,
}

pub trait EnvironmentFactory: Send + Sync {
    fn create_environment(
        &self,
        id: EnvironmentId,
        definition: &EnvironmentDefinition,
    ) -> Result<SharedEnvironment, EngineError>;
}

pub trait NodeFactory: Send + Sync {
    fn create_node(
        &self,
        id: NodeId,
        definition: &TaskDefinition,
        dependencies: BTreeSet<NodeId>,
        environment: SharedEnvironment,
    ) -> Result<MigrationNode, EngineError>;
}

pub trait HistoryStoreFactory: Send + Sync {
    fn create_history_store(
        &self,
        environment: &SharedEnvironment,
    ) -> Result<SharedHistoryStore, EngineError>;
}

/// Everything one backend type contributes.
#[derive(Clone)]
pub struct PluginBundle {
    pub environments: Arc<dyn EnvironmentFactory>,
    pub nodes: Arc<dyn NodeFactory>,
    pub history: Arc<dyn HistoryStoreFactory>,
}

pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register_type(SHELL_PLUGIN_TYPE, shell::shell_bundle());
    registry
}

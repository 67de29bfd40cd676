use super::{EnvironmentDefinition, PluginBundle, TaskDefinition};
use crate::{EngineError, MigrationGraph, SharedEnvironment};
use migraph_history::{EnvironmentId, NodeId, SharedHistoryStore};
use std::collections::{BTreeMap, BTreeSet};

/// Environments and the graph built from one set of definitions.
pub struct LoadedGraph {
    pub environments: BTreeMap<EnvironmentId, (String, SharedEnvironment)>,
    pub graph: MigrationGraph,
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    bundles_by_type: BTreeMap<String, PluginBundle>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bundle` under `plugin_type`, returning the bundle it
    /// replaced. Blank types are ignored.
    pub fn register_type(
        &mut self,
        plugin_type: impl Into<String>,
        bundle: PluginBundle,
    ) -> Option<PluginBundle> {
        let plugin_type = plugin_type.into().trim().to_string();
        if plugin_type.is_empty() {
            tracing::warn!("ignoring plugin registration with a blank type");
            return None;
        }
        tracing::debug!(plugin_type = %plugin_type, "plugin registered");
        self.bundles_by_type.insert(plugin_type, bundle)
    }

    pub fn resolve(&self, plugin_type: &str) -> Result<&PluginBundle, EngineError> {
        self.bundles_by_type
            .get(plugin_type.trim())
            .ok_or_else(|| EngineError::PluginNotFound {
                plugin_type: plugin_type.to_string(),
                available: self.supported_types(),
            })
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.bundles_by_type.keys().cloned().collect()
    }

    pub fn contains(&self, plugin_type: &str) -> bool {
        self.bundles_by_type.contains_key(plugin_type.trim())
    }

    pub fn len(&self) -> usize {
        self.bundles_by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles_by_type.is_empty()
    }

    /// Builds every environment, then every node in `tasks` order, then
    /// checks that all dependencies resolve. Nothing runs.
    pub fn load_graph<'a>(
        &self,
        targets: impl IntoIterator<Item = (&'a String, &'a EnvironmentDefinition)>,
        tasks: impl IntoIterator<Item = (&'a String, &'a TaskDefinition)>,
    ) -> Result<LoadedGraph, EngineError> {
        let mut environments = BTreeMap::new();
        let mut by_key = BTreeMap::new();
        for (key, definition) in targets {
            let id = EnvironmentId::new(key.as_str())?;
            let bundle = self.resolve(&definition.plugin_type)?;
            let environment = bundle.environments.create_environment(id.clone(), definition)?;
            by_key.insert(key.clone(), (definition.plugin_type.clone(), environment.clone()));
            environments.insert(id, (definition.plugin_type.clone(), environment));
        }

        let mut graph = MigrationGraph::new();
        for (key, definition) in tasks {
            let id = NodeId::new(key.as_str())?;
            let (plugin_type, environment) = by_key.get(&definition.target).ok_or_else(|| {
                EngineError::InvalidDefinition(format!(
                    "task '{key}' targets unknown environment '{}'",
                    definition.target
                ))
            })?;
            let dependencies = definition
                .dependencies
                .iter()
                .map(|dependency| NodeId::new(dependency.as_str()))
                .collect::<Result<BTreeSet<_>, _>>()?;
            let node = self.resolve(plugin_type)?.nodes.create_node(
                id,
                definition,
                dependencies,
                environment.clone(),
            )?;
            graph.add_node(node)?;
        }
        graph.ensure_resolved()?;

        Ok(LoadedGraph {
            environments,
            graph,
        })
    }

    /// History store for `environment` from the plugin that owns it.
    pub fn history_store(
        &self,
        plugin_type: &str,
        environment: &SharedEnvironment,
    ) -> Result<SharedHistoryStore, EngineError> {
        self.resolve(plugin_type)?
            .history
            .create_history_store(environment)
    }
}

use crate::{EngineError, SharedDownTaskRestorer, SharedEnvironment, SharedTask};
use migraph_history::{EnvironmentId, NodeId};
use std::collections::BTreeSet;
use std::fmt;

/// One migration task bound to an environment. Immutable once built.
pub struct MigrationNode {
    id: NodeId,
    name: String,
    description: Option<String>,
    environment: SharedEnvironment,
    dependencies: BTreeSet<NodeId>,
    up_task: SharedTask,
    down_task: Option<SharedTask>,
    restorer: Option<SharedDownTaskRestorer>,
}

impl MigrationNode {
    pub fn builder(
        id: NodeId,
        name: impl Into<String>,
        environment: SharedEnvironment,
        up_task: SharedTask,
    ) -> MigrationNodeBuilder {
        MigrationNodeBuilder {
            id,
            name: name.into(),
            description: None,
            environment,
            dependencies: BTreeSet::new(),
            up_task,
            down_task: None,
            restorer: None,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.environment
    }

    pub fn environment_id(&self) -> &EnvironmentId {
        self.environment.id()
    }

    pub fn dependencies(&self) -> &BTreeSet<NodeId> {
        &self.dependencies
    }

    pub fn up_task(&self) -> &SharedTask {
        &self.up_task
    }

    pub fn down_task(&self) -> Option<&SharedTask> {
        self.down_task.as_ref()
    }

    pub fn restorer(&self) -> Option<&SharedDownTaskRestorer> {
        self.restorer.as_ref()
    }

    /// True when some inverse action can exist for this node.
    pub fn is_reversible(&self) -> bool {
        self.down_task.is_some() || self.restorer.is_some()
    }

    /// Label stored on history records.
    pub fn record_description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }
}

impl fmt::Debug for MigrationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("environment", self.environment.id())
            .field("dependencies", &self.dependencies)
            .field("has_down_task", &self.down_task.is_some())
            .finish()
    }
}

pub struct MigrationNodeBuilder {
    id: NodeId,
    name: String,
    description: Option<String>,
    environment: SharedEnvironment,
    dependencies: BTreeSet<NodeId>,
    up_task: SharedTask,
    down_task: Option<SharedTask>,
    restorer: Option<SharedDownTaskRestorer>,
}

impl MigrationNodeBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn depends_on(mut self, dependency: NodeId) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    pub fn dependencies(mut self, dependencies: impl IntoIterator<Item = NodeId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn down_task(mut self, task: SharedTask) -> Self {
        self.down_task = Some(task);
        self
    }

    pub fn restorer(mut self, restorer: SharedDownTaskRestorer) -> Self {
        self.restorer = Some(restorer);
        self
    }

    pub fn build(self) -> Result<MigrationNode, EngineError> {
        if self.dependencies.contains(&self.id) {
            return Err(EngineError::SelfDependency(self.id));
        }
        Ok(MigrationNode {
            id: self.id,
            name: self.name,
            description: self.description,
            environment: self.environment,
            dependencies: self.dependencies,
            up_task: self.up_task,
            down_task: self.down_task,
            restorer: self.restorer,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_node(id: &str, dependencies: &[&str]) -> MigrationNode {
    use crate::{FnTask, SimpleEnvironment, TaskOutcome};

    let environment = SimpleEnvironment::shared(
        EnvironmentId::new("db1").expect("environment id should be valid"),
        "db1",
    );
    let up = FnTask::shared(id.to_string(), || Ok(TaskOutcome::new("ok")));
    MigrationNode::builder(
        NodeId::new(id).expect("node id should be valid"),
        id.to_string(),
        environment,
        up,
    )
    .dependencies(
        dependencies
            .iter()
            .map(|dep| NodeId::new(*dep).expect("dependency id should be valid")),
    )
    .build()
    .expect("test node should build")
}

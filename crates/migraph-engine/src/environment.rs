use migraph_history::EnvironmentId;
use std::any::Any;
use std::sync::Arc;

/// An execution target such as a database. Plugins downcast through
/// [`Environment::as_any`] to reach their own connection settings.
pub trait Environment: Send + Sync {
    fn id(&self) -> &EnvironmentId;
    fn name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

pub type SharedEnvironment = Arc<dyn Environment>;

/// Environment with no capabilities beyond its identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleEnvironment {
    id: EnvironmentId,
    name: String,
}

impl SimpleEnvironment {
    pub fn new(id: EnvironmentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn shared(id: EnvironmentId, name: impl Into<String>) -> SharedEnvironment {
        Arc::new(Self::new(id, name))
    }
}

impl Environment for SimpleEnvironment {
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

use crate::ExecutionPlanInfo;
use migraph_history::NodeId;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on nodes of one level running at once. 1 runs levels
    /// sequentially.
    pub max_parallel: usize,
    /// Elapsed limit per task invocation. Expiry is recorded as a failure.
    /// Only tasks that await can be cut off; a blocking task such as
    /// [`FnTask`](crate::FnTask) runs to completion regardless.
    pub task_timeout: Option<Duration>,
    /// Report the UP plan without invoking tasks or writing history.
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            task_timeout: None,
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackScope {
    /// The target plus everything that transitively depends on it.
    Target(NodeId),
    All,
}

/// Asked once before a non-dry-run rollback touches anything.
pub trait Confirmation: Send + Sync {
    fn confirm(&self, info: &ExecutionPlanInfo) -> bool;
}

pub type SharedConfirmation = Arc<dyn Confirmation>;

impl<F> Confirmation for F
where
    F: Fn(&ExecutionPlanInfo) -> bool + Send + Sync,
{
    fn confirm(&self, info: &ExecutionPlanInfo) -> bool {
        self(info)
    }
}

#[derive(Clone)]
pub struct RollbackRequest {
    pub scope: RollbackScope,
    pub dry_run: bool,
    pub skip_confirmation: bool,
    pub confirmation: Option<SharedConfirmation>,
}

impl RollbackRequest {
    pub fn target(node_id: NodeId) -> Self {
        Self::new(RollbackScope::Target(node_id))
    }

    pub fn all() -> Self {
        Self::new(RollbackScope::All)
    }

    fn new(scope: RollbackScope) -> Self {
        Self {
            scope,
            dry_run: false,
            skip_confirmation: false,
            confirmation: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn skip_confirmation(mut self, skip: bool) -> Self {
        self.skip_confirmation = skip;
        self
    }

    pub fn with_confirmation(mut self, confirmation: SharedConfirmation) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    /// True when the caller may proceed. No hook or `skip_confirmation`
    /// counts as consent.
    pub(crate) fn confirmed(&self, info: &ExecutionPlanInfo) -> bool {
        if self.skip_confirmation {
            return true;
        }
        self.confirmation
            .as_ref()
            .is_none_or(|confirmation| confirmation.confirm(info))
    }
}

impl std::fmt::Debug for RollbackRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackRequest")
            .field("scope", &self.scope)
            .field("dry_run", &self.dry_run)
            .field("skip_confirmation", &self.skip_confirmation)
            .field("has_confirmation", &self.confirmation.is_some())
            .finish()
    }
}

use crate::rollback::{plan_rollback, resolve_down_task};
use crate::{
    EngineConfig, EngineError, ExecutionPlan, ExecutionPlanInfo, MigrationGraph, MigrationNode,
    NoopListener, RollbackRequest, SharedExecutionListener, SharedTask, StatusReport, TaskError,
    TaskOutcome, collect_status, schedule, schedule_subset,
};
use futures::FutureExt;
use futures::future::join_all;
use migraph_history::{
    ExecutionDirection, ExecutionRecord, NodeId, SharedHistoryStore, latest_applied_record,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ALREADY_APPLIED: &str = "already applied";
const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub direction: ExecutionDirection,
    pub total_nodes: usize,
    pub executed_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub success: bool,
}

impl ExecutionSummary {
    fn new(direction: ExecutionDirection, total_nodes: usize) -> Self {
        Self {
            direction,
            total_nodes,
            executed_count: 0,
            skipped_count: 0,
            failed_count: 0,
            success: true,
        }
    }

    /// A successful run that changed nothing.
    pub fn is_noop(&self) -> bool {
        self.success && self.executed_count == 0 && self.failed_count == 0
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} executed, {} skipped, {} failed",
            self.executed_count, self.skipped_count, self.failed_count
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub node_name: String,
    pub direction: ExecutionDirection,
    pub raw_content: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub plan: ExecutionPlanInfo,
    pub summary: ExecutionSummary,
    pub failure: Option<NodeFailure>,
    /// The confirmation hook declined the rollback; nothing ran.
    pub cancelled: bool,
    pub dry_run: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.summary.success
    }
}

/// Drives UP and DOWN runs against one history store.
pub struct ExecutionEngine {
    history: SharedHistoryStore,
    listener: SharedExecutionListener,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(history: SharedHistoryStore) -> Self {
        Self {
            history,
            listener: Arc::new(NoopListener),
            config: EngineConfig::default(),
        }
    }

    pub fn with_listener(mut self, listener: SharedExecutionListener) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &SharedHistoryStore {
        &self.history
    }

    /// Schedules and applies every node of the graph.
    pub async fn execute_up(&self, graph: &MigrationGraph) -> Result<RunReport, EngineError> {
        let plan = schedule(graph)?;
        self.execute_plan(&plan).await
    }

    /// Applies `target` and everything it transitively depends on.
    pub async fn execute_up_to(
        &self,
        graph: &MigrationGraph,
        target: &NodeId,
    ) -> Result<RunReport, EngineError> {
        if !graph.contains(target) {
            return Err(EngineError::UnknownNode(target.clone()));
        }
        let mut members = graph.all_dependencies(target);
        members.insert(target.clone());
        let plan = schedule_subset(graph, &members)?;
        self.execute_plan(&plan).await
    }

    /// Runs the plan level by level. Already-applied nodes are skipped
    /// without a history write; the first failure stops the run once the
    /// nodes already dispatched with it have finished.
    pub async fn execute_plan(&self, plan: &ExecutionPlan) -> Result<RunReport, EngineError> {
        self.history.initialize().await?;

        let mut applied = BTreeSet::new();
        for node in plan.ordered_nodes() {
            if self
                .history
                .was_executed(node.id(), node.environment_id())
                .await?
            {
                applied.insert(node.id().clone());
            }
        }
        let info = ExecutionPlanInfo {
            direction: ExecutionDirection::Up,
            levels: plan.levels().iter().map(|level| level.node_ids()).collect(),
            applied,
            total_nodes: plan.total_nodes(),
            dry_run: self.config.dry_run,
        };
        tracing::debug!(
            levels = plan.level_count(),
            nodes = plan.total_nodes(),
            max_parallelism = plan.max_parallelism(),
            dry_run = self.config.dry_run,
            "up plan created"
        );
        self.listener.on_plan_created(&info);

        let mut summary = ExecutionSummary::new(ExecutionDirection::Up, plan.total_nodes());
        if self.config.dry_run {
            summary.skipped_count = info.applied.len();
            return Ok(self.finish(info, summary, None, false, true));
        }

        let mut failure = None;
        let chunk_size = self.config.max_parallel.max(1);
        'levels: for level in plan.levels() {
            let mut pending = Vec::new();
            for node in level.nodes() {
                if self
                    .history
                    .was_executed(node.id(), node.environment_id())
                    .await?
                {
                    tracing::debug!(
                        node_id = %node.id(),
                        environment = %node.environment_id(),
                        "node skipped, already applied"
                    );
                    summary.skipped_count += 1;
                    self.listener
                        .on_node_skipped(node, ExecutionDirection::Up, ALREADY_APPLIED);
                } else {
                    pending.push(Arc::clone(node));
                }
            }

            for chunk in pending.chunks(chunk_size) {
                for node in chunk {
                    self.started(node, ExecutionDirection::Up);
                }
                let results = join_all(
                    chunk
                        .iter()
                        .map(|node| self.invoke(Arc::clone(node.up_task()))),
                )
                .await;

                // History writes happen here, one at a time, in level order.
                for (node, (result, elapsed)) in chunk.iter().zip(results) {
                    match result {
                        Ok(outcome) => {
                            self.history
                                .record(ExecutionRecord::up_success(
                                    node.id().clone(),
                                    node.environment_id().clone(),
                                    node.record_description(),
                                    outcome.inverse_payload,
                                    elapsed,
                                ))
                                .await?;
                            summary.executed_count += 1;
                            self.succeeded(node, ExecutionDirection::Up, elapsed);
                        }
                        Err(error) => {
                            let failed = self
                                .fail(
                                    node,
                                    ExecutionDirection::Up,
                                    node.up_task().raw_content(),
                                    &error,
                                    elapsed,
                                )
                                .await?;
                            summary.failed_count += 1;
                            failure.get_or_insert(failed);
                        }
                    }
                }
                if failure.is_some() {
                    break 'levels;
                }
            }
        }

        summary.success = failure.is_none();
        Ok(self.finish(info, summary, failure, false, false))
    }

    /// Rolls back applied nodes one at a time in reverse dependency order.
    /// A node without a usable inverse action aborts the rollback; nodes
    /// already rolled back stay rolled back.
    pub async fn execute_down(
        &self,
        graph: &MigrationGraph,
        request: &RollbackRequest,
    ) -> Result<RunReport, EngineError> {
        self.history.initialize().await?;
        let nodes = plan_rollback(graph, self.history.as_ref(), &request.scope).await?;

        let info = ExecutionPlanInfo {
            direction: ExecutionDirection::Down,
            levels: nodes.iter().map(|node| vec![node.id().clone()]).collect(),
            applied: nodes.iter().map(|node| node.id().clone()).collect(),
            total_nodes: nodes.len(),
            dry_run: request.dry_run,
        };
        self.listener.on_plan_created(&info);

        let mut summary = ExecutionSummary::new(ExecutionDirection::Down, nodes.len());
        if request.dry_run {
            return Ok(self.finish(info, summary, None, false, true));
        }
        if !nodes.is_empty() && !request.confirmed(&info) {
            tracing::info!(nodes = nodes.len(), "rollback cancelled by confirmation hook");
            return Ok(self.finish(info, summary, None, true, false));
        }

        let mut failure = None;
        for node in &nodes {
            self.started(node, ExecutionDirection::Down);
            let records = self.history.all_records(node.environment_id()).await?;
            let payload = latest_applied_record(&records, node.id())
                .and_then(|record| record.inverse_payload())
                .map(str::to_string);

            let task = match resolve_down_task(node, payload.as_deref()) {
                Ok(task) => task,
                Err(message) => {
                    tracing::warn!(
                        node_id = %node.id(),
                        environment = %node.environment_id(),
                        "node cannot be rolled back"
                    );
                    let failed = self
                        .fail(
                            node,
                            ExecutionDirection::Down,
                            None,
                            &TaskError::new(message),
                            Duration::ZERO,
                        )
                        .await?;
                    summary.failed_count += 1;
                    failure = Some(failed);
                    break;
                }
            };

            let (result, elapsed) = self.invoke(Arc::clone(&task)).await;
            match result {
                Ok(_) => {
                    self.history
                        .record(ExecutionRecord::down_success(
                            node.id().clone(),
                            node.environment_id().clone(),
                            node.record_description(),
                            elapsed,
                        ))
                        .await?;
                    summary.executed_count += 1;
                    self.succeeded(node, ExecutionDirection::Down, elapsed);
                }
                Err(error) => {
                    let failed = self
                        .fail(
                            node,
                            ExecutionDirection::Down,
                            task.raw_content(),
                            &error,
                            elapsed,
                        )
                        .await?;
                    summary.failed_count += 1;
                    failure = Some(failed);
                    break;
                }
            }
        }

        summary.success = failure.is_none();
        Ok(self.finish(info, summary, failure, false, false))
    }

    pub async fn status(&self, graph: &MigrationGraph) -> Result<StatusReport, EngineError> {
        self.history.initialize().await?;
        collect_status(graph, self.history.as_ref()).await
    }

    async fn invoke(&self, task: SharedTask) -> (Result<TaskOutcome, TaskError>, Duration) {
        let started = Instant::now();
        let call = AssertUnwindSafe(task.execute()).catch_unwind();
        let caught = match self.config.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(caught) => caught,
                Err(_) => {
                    let error = TaskError::new(format!("timed out after {} ms", limit.as_millis()));
                    return (Err(error), started.elapsed());
                }
            },
            None => call.await,
        };
        let result = caught.unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|message| (*message).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            Err(TaskError::new(format!("task panicked: {message}")))
        });
        (result, started.elapsed())
    }

    fn started(&self, node: &MigrationNode, direction: ExecutionDirection) {
        tracing::info!(
            node_id = %node.id(),
            environment = %node.environment_id(),
            direction = %direction,
            "node started"
        );
        self.listener.on_node_started(node, direction);
    }

    fn succeeded(&self, node: &MigrationNode, direction: ExecutionDirection, elapsed: Duration) {
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            node_id = %node.id(),
            environment = %node.environment_id(),
            direction = %direction,
            duration_ms,
            "node succeeded"
        );
        self.listener.on_node_succeeded(node, direction, duration_ms);
    }

    /// Records the failure before anything else sees it.
    async fn fail(
        &self,
        node: &MigrationNode,
        direction: ExecutionDirection,
        raw_content: Option<String>,
        error: &TaskError,
        elapsed: Duration,
    ) -> Result<NodeFailure, EngineError> {
        let message = if error.0.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            error.0.clone()
        };
        self.history
            .record(ExecutionRecord::failure(
                node.id().clone(),
                node.environment_id().clone(),
                direction,
                node.record_description(),
                message.clone(),
                elapsed,
            )?)
            .await?;

        tracing::warn!(
            node_id = %node.id(),
            environment = %node.environment_id(),
            direction = %direction,
            error = %message,
            "node failed"
        );
        self.listener
            .on_node_failed(node, direction, raw_content.as_deref(), &message);

        Ok(NodeFailure {
            node_id: node.id().clone(),
            node_name: node.name().to_string(),
            direction,
            raw_content,
            message,
        })
    }

    fn finish(
        &self,
        plan: ExecutionPlanInfo,
        summary: ExecutionSummary,
        failure: Option<NodeFailure>,
        cancelled: bool,
        dry_run: bool,
    ) -> RunReport {
        tracing::debug!(
            direction = %summary.direction,
            executed = summary.executed_count,
            skipped = summary.skipped_count,
            failed = summary.failed_count,
            success = summary.success,
            "run completed"
        );
        self.listener.on_completed(&summary);
        RunReport {
            plan,
            summary,
            failure,
            cancelled,
            dry_run,
        }
    }
}

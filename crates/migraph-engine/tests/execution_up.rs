use async_trait::async_trait;
use migraph_engine::{
    EngineConfig, ExecutionEngine, ExecutionListener, ExecutionPlanInfo, ExecutionSummary, FnTask,
    MigrationGraph, MigrationNode, SharedEnvironment, SimpleEnvironment, Task, TaskError,
    TaskOutcome, schedule,
};
use migraph_history::{
    EnvironmentId, ExecutionDirection, ExecutionStatus, HistoryStore, MemoryHistoryStore, NodeId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn push(&self, event: String) {
        self.events.lock().expect("mutex").push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().expect("mutex").clone()
    }
}

impl ExecutionListener for RecordingListener {
    fn on_plan_created(&self, info: &ExecutionPlanInfo) {
        self.push(format!("plan:{}", info.total_nodes));
    }

    fn on_node_started(&self, node: &MigrationNode, _direction: ExecutionDirection) {
        self.push(format!("started:{}", node.id()));
    }

    fn on_node_succeeded(&self, node: &MigrationNode, _direction: ExecutionDirection, _ms: u64) {
        self.push(format!("succeeded:{}", node.id()));
    }

    fn on_node_skipped(&self, node: &MigrationNode, _direction: ExecutionDirection, reason: &str) {
        self.push(format!("skipped:{}:{reason}", node.id()));
    }

    fn on_node_failed(
        &self,
        node: &MigrationNode,
        _direction: ExecutionDirection,
        raw_content: Option<&str>,
        message: &str,
    ) {
        self.push(format!(
            "failed:{}:{}:{message}",
            node.id(),
            raw_content.unwrap_or("-")
        ));
    }

    fn on_completed(&self, summary: &ExecutionSummary) {
        self.push(format!("completed:{summary}"));
    }
}

fn id(value: &str) -> NodeId {
    NodeId::new(value).expect("node id should be valid")
}

fn env() -> EnvironmentId {
    EnvironmentId::new("db1").expect("environment id should be valid")
}

fn environment() -> SharedEnvironment {
    SimpleEnvironment::shared(env(), "db1")
}

fn logged_node(name: &str, dependencies: &[&str], log: &Log, fail: bool) -> MigrationNode {
    let log = Arc::clone(log);
    let label = name.to_string();
    let up = FnTask::shared(name, move || {
        log.lock().expect("mutex").push(format!("up:{label}"));
        if fail {
            Err(TaskError::new(format!("{label} exploded")))
        } else {
            Ok(TaskOutcome::new("ok"))
        }
    });
    MigrationNode::builder(id(name), name, environment(), up)
        .dependencies(dependencies.iter().map(|dep| id(dep)))
        .build()
        .expect("node should build")
}

fn task_node(name: &str, dependencies: &[&str], task: Arc<dyn Task>) -> MigrationNode {
    MigrationNode::builder(id(name), name, environment(), task)
        .dependencies(dependencies.iter().map(|dep| id(dep)))
        .build()
        .expect("node should build")
}

struct SleepyTask {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for SleepyTask {
    async fn execute(&self) -> Result<TaskOutcome, TaskError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(TaskOutcome::new("slept"))
    }

    fn description(&self) -> String {
        "sleep".to_string()
    }
}

struct ScriptTask;

#[async_trait]
impl Task for ScriptTask {
    async fn execute(&self) -> Result<TaskOutcome, TaskError> {
        Err(TaskError::new("syntax error at or near \"TABEL\""))
    }

    fn description(&self) -> String {
        "create table".to_string()
    }

    fn raw_content(&self) -> Option<String> {
        Some("CREATE TABEL users ();".to_string())
    }
}

struct PanickingTask;

#[async_trait]
impl Task for PanickingTask {
    async fn execute(&self) -> Result<TaskOutcome, TaskError> {
        panic!("driver crashed");
    }

    fn description(&self) -> String {
        "panics".to_string()
    }
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_two_step_example_expected_second_run_all_skipped() {
    let log: Log = Arc::default();
    let mut graph = MigrationGraph::new();
    graph
        .add_node(logged_node("db1/create_users", &[], &log, false))
        .expect("add create_users");
    graph
        .add_node(logged_node("db1/add_index", &["db1/create_users"], &log, false))
        .expect("add add_index");
    let history = Arc::new(MemoryHistoryStore::new());
    let listener = Arc::new(RecordingListener::default());
    let engine = ExecutionEngine::new(history.clone()).with_listener(listener.clone());

    let first = engine.execute_up(&graph).await.expect("first run should complete");
    assert!(first.is_success());
    assert_eq!(first.plan.levels.len(), 2);
    assert_eq!(first.summary.executed_count, 2);
    assert_eq!(
        *log.lock().expect("mutex"),
        vec!["up:db1/create_users", "up:db1/add_index"]
    );
    let records = history.all_records(&env()).await.expect("records should list");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.is_up() && record.is_success()));

    let second = engine.execute_up(&graph).await.expect("second run should complete");
    assert!(second.summary.is_noop());
    assert_eq!(second.summary.to_string(), "0 executed, 2 skipped, 0 failed");
    assert_eq!(log.lock().expect("mutex").len(), 2);
    assert_eq!(
        history.all_records(&env()).await.expect("records should list").len(),
        2
    );
    assert!(
        listener
            .events()
            .contains(&"skipped:db1/add_index:already applied".to_string())
    );
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_failure_in_middle_level_expected_run_aborted() {
    let log: Log = Arc::default();
    let mut graph = MigrationGraph::new();
    graph.add_node(logged_node("a", &[], &log, false)).expect("add a");
    graph.add_node(logged_node("b", &[], &log, false)).expect("add b");
    graph.add_node(logged_node("c", &["a"], &log, true)).expect("add c");
    graph.add_node(logged_node("d", &["b"], &log, false)).expect("add d");
    graph.add_node(logged_node("e", &["c", "d"], &log, false)).expect("add e");
    let history = Arc::new(MemoryHistoryStore::new());
    let listener = Arc::new(RecordingListener::default());
    let engine = ExecutionEngine::new(history.clone()).with_listener(listener.clone());

    let report = engine.execute_up(&graph).await.expect("run should complete");
    assert!(!report.is_success());
    let failure = report.failure.expect("failure should be reported");
    assert_eq!(failure.node_id, id("c"));
    assert_eq!(failure.message, "c exploded");
    assert_eq!(report.summary.executed_count, 2);
    assert_eq!(report.summary.failed_count, 1);

    let records = history.all_records(&env()).await.expect("records should list");
    for level_zero in ["a", "b"] {
        assert!(records.iter().any(|record| {
            record.node_id() == &id(level_zero) && record.status() == ExecutionStatus::Success
        }));
    }
    let failed = records
        .iter()
        .find(|record| record.node_id() == &id("c"))
        .expect("failure should be recorded");
    assert_eq!(failed.status(), ExecutionStatus::Failure);
    assert_eq!(failed.error_message(), Some("c exploded"));
    assert!(!records.iter().any(|record| record.node_id() == &id("e")));
    assert!(!log.lock().expect("mutex").contains(&"up:e".to_string()));

    let events = listener.events();
    assert_eq!(events.first().map(String::as_str), Some("plan:5"));
    assert_eq!(
        events.last().map(String::as_str),
        Some("completed:2 executed, 0 skipped, 1 failed")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_parallel_chunk_failure_expected_siblings_recorded_and_next_level_skipped() {
    let log: Log = Arc::default();
    let mut graph = MigrationGraph::new();
    graph.add_node(logged_node("ok_a", &[], &log, false)).expect("add ok_a");
    graph.add_node(logged_node("bad_a", &[], &log, true)).expect("add bad_a");
    graph.add_node(logged_node("ok_b", &[], &log, false)).expect("add ok_b");
    graph.add_node(logged_node("bad_b", &[], &log, true)).expect("add bad_b");
    graph.add_node(logged_node("later", &["ok_a"], &log, false)).expect("add later");
    let history = Arc::new(MemoryHistoryStore::new());
    let engine = ExecutionEngine::new(history.clone()).with_config(EngineConfig {
        max_parallel: 4,
        ..EngineConfig::default()
    });

    let report = engine.execute_up(&graph).await.expect("run should complete");
    assert!(!report.is_success());
    assert_eq!(report.summary.executed_count, 2);
    assert_eq!(report.summary.failed_count, 2);
    let failure = report.failure.expect("failure should be reported");
    assert!(failure.node_id == id("bad_a") || failure.node_id == id("bad_b"));

    let records = history.all_records(&env()).await.expect("records should list");
    assert_eq!(records.len(), 4);
    let status_of = |name: &str| {
        records
            .iter()
            .find(|record| record.node_id() == &id(name))
            .map(|record| record.status())
    };
    assert_eq!(status_of("ok_a"), Some(ExecutionStatus::Success));
    assert_eq!(status_of("ok_b"), Some(ExecutionStatus::Success));
    assert_eq!(status_of("bad_a"), Some(ExecutionStatus::Failure));
    assert_eq!(status_of("bad_b"), Some(ExecutionStatus::Failure));
    assert_eq!(status_of("later"), None);
    assert!(!log.lock().expect("mutex").contains(&"up:later".to_string()));
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_after_failure_fixed_expected_only_remaining_nodes_run() {
    let log: Log = Arc::default();
    let history = Arc::new(MemoryHistoryStore::new());
    let engine = ExecutionEngine::new(history.clone());

    let mut broken = MigrationGraph::new();
    broken.add_node(logged_node("a", &[], &log, false)).expect("add a");
    broken.add_node(logged_node("b", &["a"], &log, true)).expect("add b");
    let report = engine.execute_up(&broken).await.expect("run should complete");
    assert!(!report.is_success());

    let mut fixed = MigrationGraph::new();
    fixed.add_node(logged_node("a", &[], &log, false)).expect("add a");
    fixed.add_node(logged_node("b", &["a"], &log, false)).expect("add b");
    let report = engine.execute_up(&fixed).await.expect("run should complete");
    assert!(report.is_success());
    assert_eq!(report.summary.executed_count, 1);
    assert_eq!(report.summary.skipped_count, 1);
    assert_eq!(*log.lock().expect("mutex"), vec!["up:a", "up:b", "up:b"]);
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_empty_graph_expected_successful_noop() {
    let history = Arc::new(MemoryHistoryStore::new());
    let report = ExecutionEngine::new(history)
        .execute_up(&MigrationGraph::new())
        .await
        .expect("empty run should complete");
    assert!(report.is_success());
    assert!(report.summary.is_noop());
    assert_eq!(report.summary.total_nodes, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_dry_run_expected_no_invocations_or_records() {
    let log: Log = Arc::default();
    let mut graph = MigrationGraph::new();
    graph.add_node(logged_node("a", &[], &log, false)).expect("add a");
    graph.add_node(logged_node("b", &["a"], &log, false)).expect("add b");
    let history = Arc::new(MemoryHistoryStore::new());
    let engine = ExecutionEngine::new(history.clone()).with_config(EngineConfig {
        dry_run: true,
        ..EngineConfig::default()
    });

    let report = engine.execute_up(&graph).await.expect("dry run should complete");
    assert!(report.dry_run);
    assert_eq!(report.plan.levels, vec![vec![id("a")], vec![id("b")]]);
    assert_eq!(report.plan.pending_nodes(), vec![&id("a"), &id("b")]);
    assert!(log.lock().expect("mutex").is_empty());
    assert!(
        history
            .all_records(&env())
            .await
            .expect("records should list")
            .is_empty()
    );
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_max_parallel_expected_level_runs_concurrently() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut graph = MigrationGraph::new();
    for name in ["a", "b", "c"] {
        let task = Arc::new(SleepyTask {
            delay: Duration::from_millis(20),
            in_flight: Arc::clone(&in_flight),
            peak: Arc::clone(&peak),
        });
        graph.add_node(task_node(name, &[], task)).expect("add node");
    }
    let history = Arc::new(MemoryHistoryStore::new());
    let engine = ExecutionEngine::new(history.clone()).with_config(EngineConfig {
        max_parallel: 4,
        ..EngineConfig::default()
    });

    let report = engine.execute_up(&graph).await.expect("run should complete");
    assert!(report.is_success());
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(
        history.executed_nodes(&env()).await.expect("nodes should list"),
        vec![id("a"), id("b"), id("c")]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_sequential_default_expected_no_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut graph = MigrationGraph::new();
    for name in ["a", "b"] {
        let task = Arc::new(SleepyTask {
            delay: Duration::from_millis(5),
            in_flight: Arc::clone(&in_flight),
            peak: Arc::clone(&peak),
        });
        graph.add_node(task_node(name, &[], task)).expect("add node");
    }
    let engine = ExecutionEngine::new(Arc::new(MemoryHistoryStore::new()));

    engine.execute_up(&graph).await.expect("run should complete");
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_task_timeout_expected_failure_record() {
    let mut graph = MigrationGraph::new();
    let task = Arc::new(SleepyTask {
        delay: Duration::from_millis(500),
        in_flight: Arc::default(),
        peak: Arc::default(),
    });
    graph.add_node(task_node("slow", &[], task)).expect("add slow");
    let history = Arc::new(MemoryHistoryStore::new());
    let engine = ExecutionEngine::new(history.clone()).with_config(EngineConfig {
        task_timeout: Some(Duration::from_millis(10)),
        ..EngineConfig::default()
    });

    let report = engine.execute_up(&graph).await.expect("run should complete");
    let failure = report.failure.expect("timeout should fail the run");
    assert!(failure.message.contains("timed out"));
    let latest = history
        .find_latest_record(&id("slow"), &env())
        .await
        .expect("lookup should succeed")
        .expect("record should exist");
    assert_eq!(latest.status(), ExecutionStatus::Failure);
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_blocking_task_past_timeout_expected_recorded_by_result() {
    let mut graph = MigrationGraph::new();
    let task = FnTask::shared("blocking", || {
        std::thread::sleep(Duration::from_millis(40));
        Ok(TaskOutcome::new("done"))
    });
    graph.add_node(task_node("blocking", &[], task)).expect("add blocking");
    let history = Arc::new(MemoryHistoryStore::new());
    let engine = ExecutionEngine::new(history.clone()).with_config(EngineConfig {
        task_timeout: Some(Duration::from_millis(5)),
        ..EngineConfig::default()
    });

    let report = engine.execute_up(&graph).await.expect("run should complete");
    assert!(report.is_success(), "{:?}", report.failure);
    assert!(
        history
            .was_executed(&id("blocking"), &env())
            .await
            .expect("lookup should succeed")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_panicking_task_expected_failure_not_crash() {
    let mut graph = MigrationGraph::new();
    graph
        .add_node(task_node("boom", &[], Arc::new(PanickingTask)))
        .expect("add boom");
    let history = Arc::new(MemoryHistoryStore::new());

    let report = ExecutionEngine::new(history.clone())
        .execute_up(&graph)
        .await
        .expect("run should complete");
    let failure = report.failure.expect("panic should fail the run");
    assert!(failure.message.contains("driver crashed"));
    assert!(
        !history
            .was_executed(&id("boom"), &env())
            .await
            .expect("lookup should succeed")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_failure_with_raw_content_expected_forwarded() {
    let mut graph = MigrationGraph::new();
    graph
        .add_node(task_node("db1/users", &[], Arc::new(ScriptTask)))
        .expect("add users");
    let listener = Arc::new(RecordingListener::default());
    let engine =
        ExecutionEngine::new(Arc::new(MemoryHistoryStore::new())).with_listener(listener.clone());

    let report = engine.execute_up(&graph).await.expect("run should complete");
    let failure = report.failure.expect("failure should be reported");
    assert_eq!(failure.node_name, "db1/users");
    assert_eq!(failure.raw_content.as_deref(), Some("CREATE TABEL users ();"));
    assert!(listener.events().iter().any(|event| {
        event.starts_with("failed:db1/users:CREATE TABEL users ();:syntax error")
    }));
}

#[tokio::test(flavor = "current_thread")]
async fn execute_up_to_target_expected_only_dependencies_run() {
    let log: Log = Arc::default();
    let mut graph = MigrationGraph::new();
    graph.add_node(logged_node("a", &[], &log, false)).expect("add a");
    graph.add_node(logged_node("b", &["a"], &log, false)).expect("add b");
    graph.add_node(logged_node("c", &["a"], &log, false)).expect("add c");
    graph.add_node(logged_node("d", &["b"], &log, false)).expect("add d");
    let engine = ExecutionEngine::new(Arc::new(MemoryHistoryStore::new()));

    let report = engine
        .execute_up_to(&graph, &id("b"))
        .await
        .expect("targeted run should complete");
    assert_eq!(report.summary.executed_count, 2);
    assert_eq!(*log.lock().expect("mutex"), vec!["up:a", "up:b"]);

    let missing = engine.execute_up_to(&graph, &id("zzz")).await;
    assert!(missing.is_err());
}

#[tokio::test(flavor = "current_thread")]
async fn execute_plan_separate_environments_expected_history_per_environment() {
    let log: Log = Arc::default();
    let other = SimpleEnvironment::shared(EnvironmentId::new("db2").expect("env id"), "db2");
    let mut graph = MigrationGraph::new();
    graph.add_node(logged_node("db1/a", &[], &log, false)).expect("add a");
    let up = FnTask::shared("db2/a", || Ok(TaskOutcome::default()));
    graph
        .add_node(
            MigrationNode::builder(id("db2/a"), "db2/a", other, up)
                .depends_on(id("db1/a"))
                .build()
                .expect("node should build"),
        )
        .expect("add db2 node");
    let history = Arc::new(MemoryHistoryStore::new());
    let plan = schedule(&graph).expect("graph should schedule");

    ExecutionEngine::new(history.clone())
        .execute_plan(&plan)
        .await
        .expect("run should complete");
    let db2 = EnvironmentId::new("db2").expect("env id");
    assert_eq!(
        history.executed_nodes(&db2).await.expect("nodes should list"),
        vec![id("db2/a")]
    );
    assert_eq!(
        history.executed_nodes(&env()).await.expect("nodes should list"),
        vec![id("db1/a")]
    );
}

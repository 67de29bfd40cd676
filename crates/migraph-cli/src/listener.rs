use migraph_engine::{ExecutionListener, ExecutionPlanInfo, MigrationNode};
use migraph_history::ExecutionDirection;

/// Prints one line per node outcome to stdout.
pub struct ConsoleListener;

impl ExecutionListener for ConsoleListener {
    fn on_plan_created(&self, info: &ExecutionPlanInfo) {
        if !info.dry_run {
            return;
        }
        match info.direction {
            ExecutionDirection::Up => {
                for (index, level) in info.levels.iter().enumerate() {
                    let nodes = level
                        .iter()
                        .map(|id| {
                            if info.applied.contains(id) {
                                format!("{id} (applied)")
                            } else {
                                id.to_string()
                            }
                        })
                        .collect::<Vec<_>>();
                    println!("Level {index}: {}", nodes.join(", "));
                }
            }
            ExecutionDirection::Down => {
                for (index, id) in info.levels.iter().flatten().enumerate() {
                    println!("{}. {id}", index + 1);
                }
            }
        }
    }

    fn on_node_succeeded(
        &self,
        node: &MigrationNode,
        _direction: ExecutionDirection,
        duration_ms: u64,
    ) {
        println!("[OK]   {} - {} ({duration_ms}ms)", node.id(), node.name());
    }

    fn on_node_skipped(&self, node: &MigrationNode, _direction: ExecutionDirection, reason: &str) {
        println!("[SKIP] {} - {reason}", node.id());
    }

    fn on_node_failed(
        &self,
        node: &MigrationNode,
        direction: ExecutionDirection,
        raw_content: Option<&str>,
        message: &str,
    ) {
        println!("[FAIL] {} ({direction}) - {message}", node.id());
        if let Some(raw) = raw_content {
            for line in raw.lines() {
                println!("       | {line}");
            }
        }
    }
}

mod listener;
mod logging;
mod project;

use clap::{ArgAction, Parser, Subcommand};
use listener::ConsoleListener;
use migraph_engine::{
    EngineConfig, ExecutionEngine, ExecutionPlanInfo, RollbackRequest, RunReport, builtin_registry,
    schedule, schedule_subset, to_dot, validate,
};
use migraph_history::NodeId;
use project::{DEFAULT_PROJECT_FILE, Project, load_project};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "migraph")]
#[command(about = "Applies and rolls back dependency-ordered migrations")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_PROJECT_FILE)]
    project: PathBuf,
    #[arg(long, short, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations.
    Up(UpArgs),
    /// Roll back applied migrations.
    Down(DownArgs),
    /// Show applied and pending migrations.
    Status(StatusArgs),
    /// Check the migration graph for problems.
    Validate,
    /// Print the execution levels.
    Plan(PlanArgs),
    /// Print the migration graph as DOT.
    Graph,
}

#[derive(clap::Args, Debug)]
struct UpArgs {
    /// Apply only this node and what it depends on.
    #[arg(long)]
    target: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
    #[arg(long, default_value_t = 1)]
    max_parallel: usize,
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct DownArgs {
    /// Roll back this node and everything depending on it.
    #[arg(long, conflicts_with = "all", required_unless_present = "all")]
    target: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    all: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
    /// Skip the confirmation prompt.
    #[arg(long, short, action = ArgAction::SetTrue)]
    yes: bool,
}

#[derive(clap::Args, Debug)]
struct StatusArgs {
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    #[arg(long)]
    target: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let result = match load(&cli) {
        Ok(project) => match cli.command {
            Commands::Up(args) => up_command(&project, args).await,
            Commands::Down(args) => down_command(&project, args).await,
            Commands::Status(args) => status_command(&project, args).await,
            Commands::Validate => validate_command(&project),
            Commands::Plan(args) => plan_command(&project, args),
            Commands::Graph => graph_command(&project),
        },
        Err(error) => Err(error),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn load(cli: &Cli) -> Result<Project, String> {
    load_project(&cli.project, &builtin_registry())
}

fn node_id(value: &str) -> Result<NodeId, String> {
    NodeId::new(value).map_err(|error| error.to_string())
}

async fn up_command(project: &Project, args: UpArgs) -> Result<ExitCode, String> {
    if args.max_parallel == 0 {
        return Err("--max-parallel must be at least 1".to_string());
    }
    let engine = ExecutionEngine::new(project.history.clone())
        .with_listener(Arc::new(ConsoleListener))
        .with_config(EngineConfig {
            max_parallel: args.max_parallel,
            task_timeout: args.timeout_ms.map(Duration::from_millis),
            dry_run: args.dry_run,
        });

    let graph = &project.loaded.graph;
    let report = match args.target {
        Some(target) => engine.execute_up_to(graph, &node_id(&target)?).await,
        None => engine.execute_up(graph).await,
    }
    .map_err(|error| error.to_string())?;

    print_run_summary(&report);
    Ok(exit_code_for_report(&report))
}

async fn down_command(project: &Project, args: DownArgs) -> Result<ExitCode, String> {
    let request = match args.target {
        Some(target) => RollbackRequest::target(node_id(&target)?),
        None => RollbackRequest::all(),
    }
    .dry_run(args.dry_run)
    .skip_confirmation(args.yes)
    .with_confirmation(Arc::new(confirm_on_stdin));

    let engine =
        ExecutionEngine::new(project.history.clone()).with_listener(Arc::new(ConsoleListener));
    let report = engine
        .execute_down(&project.loaded.graph, &request)
        .await
        .map_err(|error| error.to_string())?;

    print_run_summary(&report);
    Ok(exit_code_for_report(&report))
}

/// Lists the rollback order and reads a yes/no answer. End of input
/// declines.
fn confirm_on_stdin(info: &ExecutionPlanInfo) -> bool {
    println!("The following migrations will be rolled back:");
    for (index, id) in info.levels.iter().flatten().enumerate() {
        println!("  {}. {id}", index + 1);
    }
    print!("Proceed with rollback? [y/N] ");
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => {
            println!();
            false
        }
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
    }
}

async fn status_command(project: &Project, args: StatusArgs) -> Result<ExitCode, String> {
    let engine = ExecutionEngine::new(project.history.clone());
    let report = engine
        .status(&project.loaded.graph)
        .await
        .map_err(|error| error.to_string())?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).map_err(|error| error.to_string())?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Project: {}", project.name);
    for node in &report.nodes {
        let state = if node.applied { "applied" } else { "pending" };
        let latest = node
            .latest
            .as_ref()
            .map(|record| format!(" (last: {} {})", record.direction(), record.status()))
            .unwrap_or_default();
        println!("[{state:<7}] {} - {}{latest}", node.node_id, node.name);
    }
    println!(
        "{} applied, {} pending",
        report.applied_count(),
        report.pending_count()
    );
    Ok(ExitCode::SUCCESS)
}

fn validate_command(project: &Project) -> Result<ExitCode, String> {
    let diagnostics = validate(&project.loaded.graph, &[]);
    for diagnostic in &diagnostics {
        println!("{diagnostic}");
    }
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        return Err(format!("validation failed with {errors} error(s)"));
    }
    println!(
        "{} migration(s) valid, {} warning(s)",
        project.loaded.graph.size(),
        diagnostics.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn plan_command(project: &Project, args: PlanArgs) -> Result<ExitCode, String> {
    let graph = &project.loaded.graph;
    let plan = match args.target {
        Some(target) => {
            let target = node_id(&target)?;
            if !graph.contains(&target) {
                return Err(format!("unknown migration '{target}'"));
            }
            let mut members = graph.all_dependencies(&target);
            members.insert(target);
            schedule_subset(graph, &members)
        }
        None => schedule(graph),
    }
    .map_err(|error| error.to_string())?;

    if args.json {
        let levels = plan
            .levels()
            .iter()
            .map(|level| level.node_ids())
            .collect::<Vec<_>>();
        let json = serde_json::to_string_pretty(&levels).map_err(|error| error.to_string())?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    for level in plan.levels() {
        let ids = level
            .node_ids()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        println!("Level {}: {}", level.level_number(), ids.join(", "));
    }
    println!(
        "{} migration(s) in {} level(s), max parallelism {}",
        plan.total_nodes(),
        plan.level_count(),
        plan.max_parallelism()
    );
    Ok(ExitCode::SUCCESS)
}

fn graph_command(project: &Project) -> Result<ExitCode, String> {
    println!("{}", to_dot(&project.loaded.graph));
    Ok(ExitCode::SUCCESS)
}

fn print_run_summary(report: &RunReport) {
    if report.cancelled {
        println!("Rollback cancelled.");
        return;
    }
    if report.dry_run {
        println!(
            "Dry run: {} migration(s) would run, nothing changed.",
            report.plan.pending_nodes().len()
        );
        return;
    }
    if report.summary.is_noop() {
        println!("Nothing to do.");
    }
    println!("{} ({})", report.summary, report.summary.direction);
    if let Some(failure) = &report.failure {
        println!(
            "Failed at {} ({}): {}",
            failure.node_id, failure.node_name, failure.message
        );
    }
}

fn exit_code_for_report(report: &RunReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

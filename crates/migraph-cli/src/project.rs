use migraph_engine::{
    EnvironmentDefinition, LoadedGraph, PluginRegistry, SHELL_PLUGIN_TYPE, TaskDefinition,
};
use migraph_history::{EnvironmentId, SharedHistoryStore};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROJECT_FILE: &str = "migraph.json";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HistorySection {
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub targets: BTreeMap<String, EnvironmentDefinition>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskDefinition>,
}

pub struct Project {
    pub name: String,
    pub loaded: LoadedGraph,
    pub history: SharedHistoryStore,
}

/// Reads the project file, expands `${VAR}` references and builds the graph
/// and history store through the plugin registry.
pub fn load_project(path: &Path, registry: &PluginRegistry) -> Result<Project, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed reading project file '{}': {e}", path.display()))?;
    let root = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    load_dotenv(&root)?;
    let mut value: Value = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid project file '{}': {e}", path.display()))?;
    expand_value(&mut value, &|name| std::env::var(name).ok())?;
    let mut project: ProjectFile = serde_json::from_value(value)
        .map_err(|e| format!("invalid project file '{}': {e}", path.display()))?;

    anchor_shell_targets(&mut project.targets, &root);
    let history_target = history_target(&project)?;

    let loaded = registry
        .load_graph(&project.targets, &project.tasks)
        .map_err(|e| e.to_string())?;
    let history_id = EnvironmentId::new(history_target.as_str()).map_err(|e| e.to_string())?;
    let (plugin_type, environment) = loaded
        .environments
        .get(&history_id)
        .ok_or_else(|| format!("history target '{history_target}' is not a defined target"))?;
    let history = registry
        .history_store(plugin_type, environment)
        .map_err(|e| e.to_string())?;
    tracing::debug!(
        project = %path.display(),
        nodes = loaded.graph.size(),
        history_target = %history_target,
        "project loaded"
    );

    Ok(Project {
        name: project.name.unwrap_or_else(|| root.display().to_string()),
        loaded,
        history,
    })
}

fn load_dotenv(root: &Path) -> Result<(), String> {
    let path = root.join(".env");
    if !path.exists() {
        return Ok(());
    }
    dotenvy::from_path(&path).map_err(|e| format!("failed loading '{}': {e}", path.display()))
}

/// The explicit `history.target`, or the only target when there is one.
fn history_target(project: &ProjectFile) -> Result<String, String> {
    if let Some(target) = &project.history.target {
        return Ok(target.clone());
    }
    let mut keys = project.targets.keys();
    match (keys.next(), keys.next()) {
        (Some(only), None) => Ok(only.clone()),
        (None, _) => Err("project defines no targets".to_string()),
        (Some(_), Some(_)) => {
            Err("history.target is required when several targets are defined".to_string())
        }
    }
}

/// Shell targets run relative to the project directory unless told
/// otherwise.
fn anchor_shell_targets(targets: &mut BTreeMap<String, EnvironmentDefinition>, root: &Path) {
    for definition in targets.values_mut() {
        if definition.plugin_type.trim() != SHELL_PLUGIN_TYPE {
            continue;
        }
        let working_dir = match definition.settings.get("working_dir") {
            Some(Value::String(dir)) if Path::new(dir).is_absolute() => continue,
            Some(Value::String(dir)) => root.join(dir),
            _ => root.to_path_buf(),
        };
        definition.settings.insert(
            "working_dir".to_string(),
            Value::String(working_dir.to_string_lossy().into_owned()),
        );
    }
}

fn expand_value<F>(value: &mut Value, lookup: &F) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            *text = expand_vars(text, lookup)?;
        }
        Value::Array(items) => {
            for item in items {
                expand_value(item, lookup)?;
            }
        }
        Value::Object(entries) => {
            for (_, item) in entries.iter_mut() {
                expand_value(item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replaces every `${NAME}` in `input`. Unknown names and unterminated
/// references are errors.
pub fn expand_vars<F>(input: &str, lookup: &F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated variable reference in '{input}'"))?;
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(format!("empty variable reference in '{input}'"));
        }
        let resolved =
            lookup(name).ok_or_else(|| format!("undefined variable '{name}' in '{input}'"))?;
        output.push_str(&resolved);
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

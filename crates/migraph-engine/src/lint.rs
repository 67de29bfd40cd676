use crate::{Diagnostic, EngineError, MigrationGraph, Severity, ValidationError, schedule};

pub trait LintRule {
    fn name(&self) -> &str;
    fn apply(&self, graph: &MigrationGraph) -> Vec<Diagnostic>;
}

pub fn validate(graph: &MigrationGraph, extra_rules: &[&dyn LintRule]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    diagnostics.extend(rule_unresolved_dependency(graph));
    diagnostics.extend(rule_dependency_cycle(graph));
    diagnostics.extend(rule_irreversible_node(graph));

    for rule in extra_rules {
        diagnostics.extend(rule.apply(graph));
    }

    diagnostics
}

pub fn validate_or_raise(
    graph: &MigrationGraph,
    extra_rules: &[&dyn LintRule],
) -> Result<Vec<Diagnostic>, ValidationError> {
    let diagnostics = validate(graph, extra_rules);
    if diagnostics.iter().any(Diagnostic::is_error) {
        return Err(ValidationError::new(diagnostics));
    }
    Ok(diagnostics)
}

fn rule_unresolved_dependency(graph: &MigrationGraph) -> Vec<Diagnostic> {
    graph
        .unresolved_dependencies()
        .into_iter()
        .map(|(node_id, dependency)| {
            Diagnostic::new(
                "unresolved_dependency",
                Severity::Error,
                format!("depends on unknown node '{dependency}'"),
            )
            .with_node_id(node_id)
            .with_fix(format!("define a task '{dependency}' or remove the dependency"))
        })
        .collect()
}

fn rule_dependency_cycle(graph: &MigrationGraph) -> Vec<Diagnostic> {
    // Unresolved dependencies are reported by their own rule.
    if !graph.unresolved_dependencies().is_empty() {
        return Vec::new();
    }
    match schedule(graph) {
        Err(EngineError::CyclicDependency { cycle }) => {
            let path = cycle
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            let mut diagnostic = Diagnostic::new(
                "dependency_cycle",
                Severity::Error,
                format!("dependency cycle: {path}"),
            );
            if let Some(first) = cycle.first() {
                diagnostic = diagnostic.with_node_id(first.clone());
            }
            vec![diagnostic]
        }
        _ => Vec::new(),
    }
}

fn rule_irreversible_node(graph: &MigrationGraph) -> Vec<Diagnostic> {
    graph
        .all_nodes()
        .filter(|node| !node.is_reversible())
        .map(|node| {
            Diagnostic::new(
                "irreversible_node",
                Severity::Warning,
                "node has no down task and cannot be rolled back",
            )
            .with_node_id(node.id().clone())
        })
        .collect()
}

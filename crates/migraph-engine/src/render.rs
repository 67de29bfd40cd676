use crate::MigrationGraph;
use graphviz_rust::dot_structures::{
    Attribute, Edge, EdgeTy, Graph, Id, Node, NodeId as DotNodeId, Stmt, Vertex,
};
use graphviz_rust::printer::{DotPrinter, PrinterContext};

/// Graphviz digraph with one edge per dependency, pointing from the
/// dependency to its dependent.
pub fn to_dot(graph: &MigrationGraph) -> String {
    let mut stmts = vec![Stmt::Attribute(Attribute(
        Id::Plain("rankdir".to_string()),
        Id::Plain("LR".to_string()),
    ))];

    for node in graph.all_nodes() {
        let label = format!("{}\\n{}", node.name(), node.environment_id());
        stmts.push(Stmt::Node(Node {
            id: vertex_id(node.id().as_str()),
            attributes: vec![
                Attribute(Id::Plain("label".to_string()), quoted(&label)),
                Attribute(
                    Id::Plain("shape".to_string()),
                    Id::Plain(if node.is_reversible() { "box" } else { "octagon" }.to_string()),
                ),
            ],
        }));
    }

    for node in graph.all_nodes() {
        for dependency in node.dependencies() {
            stmts.push(Stmt::Edge(Edge {
                ty: EdgeTy::Pair(
                    Vertex::N(vertex_id(dependency.as_str())),
                    Vertex::N(vertex_id(node.id().as_str())),
                ),
                attributes: Vec::new(),
            }));
        }
    }

    Graph::DiGraph {
        id: Id::Plain("migrations".to_string()),
        strict: false,
        stmts,
    }
    .print(&mut PrinterContext::default())
}

fn vertex_id(value: &str) -> DotNodeId {
    DotNodeId(quoted(value), None)
}

fn quoted(value: &str) -> Id {
    Id::Escaped(format!("\"{}\"", value.replace('"', "\\\"")))
}

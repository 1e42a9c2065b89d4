//! Graph export for external tooling.

use crate::graph::Graph;
use crate::node::{NodeId, NodeKind};

/// A flat, tool-friendly description of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary<'a> {
    pub id: NodeId,
    pub name: Option<&'a str>,
    /// `"Input"`, `"Constant"`, or the operation, e.g. `"Pow(2)"`.
    pub kind: String,
    pub inputs: &'a [NodeId],
}

/// Render as a Graphviz DOT document.
pub trait ToDot {
    fn to_dot(&self) -> String;
}

impl Graph {
    /// Summaries of every node, in insertion order.
    pub fn export(&self) -> Vec<NodeSummary<'_>> {
        self.nodes()
            .iter()
            .map(|node| NodeSummary {
                id: node.id(),
                name: node.name(),
                kind: kind_label(node.kind()),
                inputs: node.inputs(),
            })
            .collect()
    }
}

fn kind_label(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Input => "Input".to_string(),
        NodeKind::Constant => "Constant".to_string(),
        NodeKind::Operation(op) => op.to_string(),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl ToDot for Graph {
    /// Leaves are ellipses, operations boxes. Edges are labelled with the input
    /// position; dashed edges link an input to its gradient node.
    fn to_dot(&self) -> String {
        let mut dot = String::from("digraph G {\n");
        dot.push_str("  rankdir=TB;\n");

        for node in self.nodes() {
            let i = node.id().index();
            let shape = if node.is_leaf() { "ellipse" } else { "box" };
            let mut label = escape(&node.label());
            let kind = kind_label(node.kind());
            if node.name().is_some() || !node.is_leaf() {
                label.push_str("\\n");
                label.push_str(&kind);
            }
            if let Some(value) = node.value() {
                label.push_str("\\n");
                label.push_str(&escape(&value.to_string()));
            }
            dot.push_str(&format!(
                "  node{} [label=\"{}\", shape=\"{}\"];\n",
                i, label, shape
            ));
        }

        for node in self.nodes() {
            for (pos, input) in node.inputs().iter().enumerate() {
                dot.push_str(&format!(
                    "  node{} -> node{} [label=\"{}\"];\n",
                    input.index(),
                    node.id().index(),
                    pos
                ));
            }
        }

        for node in self.nodes() {
            if let Some(grad) = self.gradient_node(node.id()) {
                dot.push_str(&format!(
                    "  node{} -> node{} [style=dashed, color=gray];\n",
                    node.id().index(),
                    grad.index()
                ));
            }
        }

        dot.push_str("}\n");
        dot
    }
}

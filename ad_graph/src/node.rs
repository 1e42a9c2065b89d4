//! Node handles and node records stored in a [`Graph`](crate::Graph) arena.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ops::Op;
use crate::shape::Shape;
use crate::value::{Dtype, Value};

/// Global counter for graph identities.
/// Uses AtomicU64 so graphs can be created from any thread.
static GRAPH_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of a graph. Clones of a graph share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn next() -> Self {
        GraphId(GRAPH_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to a node: the owning graph plus the node's arena index.
///
/// Handles are `Copy` and cheap; they are only meaningful for the graph (or
/// snapshots of the graph) that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    graph: GraphId,
    index: usize,
}

impl NodeId {
    pub(crate) fn new(graph: GraphId, index: usize) -> Self {
        NodeId { graph, index }
    }

    /// Arena index, unique within the graph and increasing with insertion order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Create a NodeId for testing purposes.
    #[cfg(test)]
    pub(crate) fn new_for_test(index: usize) -> Self {
        NodeId {
            graph: GraphId(u64::MAX),
            index,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.index)
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A leaf whose value is assigned by the caller.
    Input,
    /// A leaf whose value is fixed at construction.
    Constant,
    /// A node computed from its inputs.
    Operation(Op),
}

/// A node record.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Option<String>,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) dependents: Vec<NodeId>,
    /// Declared or first-assigned element type (leaves only).
    pub(crate) dtype: Option<Dtype>,
    /// Declared or first-assigned shape (leaves only).
    pub(crate) shape: Option<Shape>,
    pub(crate) value: Option<Value>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The operation, if this is an operation node.
    pub fn op(&self) -> Option<Op> {
        match self.kind {
            NodeKind::Operation(op) => Some(op),
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self.kind, NodeKind::Operation(_))
    }

    /// Ordered input edges.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Nodes that read this node, in insertion order.
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Human readable label: the name, or the id when unnamed.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

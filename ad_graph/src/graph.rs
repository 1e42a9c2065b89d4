//! The expression graph.
//!
//! Nodes live in a single arena owned by the [`Graph`]; edges are stored as
//! [`NodeId`] lists. A node can only read nodes that already exist, so every
//! edge points to a strictly smaller index and the arena is a DAG by
//! construction.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{GraphError, Result};
use crate::node::{GraphId, Node, NodeId, NodeKind};
use crate::ops::Op;
use crate::shape::Shape;
use crate::value::{Dtype, Value};

/// An owned, growable computation graph.
///
/// Cloning a graph produces a snapshot with the same identity: handles issued
/// by the original stay valid in the clone.
#[derive(Debug, Clone)]
pub struct Graph {
    id: GraphId,
    nodes: Vec<Node>,
    names: HashMap<String, Vec<NodeId>>,
    /// Input node -> node computing d(output)/d(input), set by `differentiate`.
    grad_nodes: HashMap<NodeId, NodeId>,
}

impl Graph {
    /// Create an empty graph with a fresh identity.
    pub fn new() -> Self {
        Graph {
            id: GraphId::next(),
            nodes: Vec::new(),
            names: HashMap::new(),
            grad_nodes: HashMap::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // === Construction ===

    /// Add an input leaf whose dtype and shape are fixed by its first value.
    pub fn add_leaf(&mut self, name: &str) -> NodeId {
        self.push_node(Some(name.to_string()), NodeKind::Input, vec![], None, None, None)
    }

    /// Add an input leaf with a declared dtype and shape.
    pub fn add_input(&mut self, name: &str, dtype: Dtype, shape: Shape) -> NodeId {
        self.push_node(
            Some(name.to_string()),
            NodeKind::Input,
            vec![],
            Some(dtype),
            Some(shape),
            None,
        )
    }

    /// Add a scalar input leaf.
    pub fn add_scalar(&mut self, name: &str, dtype: Dtype) -> NodeId {
        self.add_input(name, dtype, Shape::scalar())
    }

    /// Add a constant leaf. Constants reject [`Graph::set_value`].
    pub fn add_constant(&mut self, value: Value) -> NodeId {
        let dtype = value.dtype();
        let shape = value.shape().clone();
        self.push_node(
            None,
            NodeKind::Constant,
            vec![],
            Some(dtype),
            Some(shape),
            Some(value),
        )
    }

    /// Add an operation node reading `inputs`.
    ///
    /// Fails without touching the graph if an input is foreign, the input
    /// count does not match the operation's arity, or an edge would not point
    /// to an earlier node.
    pub fn add_operation(&mut self, op: Op, inputs: &[NodeId]) -> Result<NodeId> {
        self.insert_operation(None, op, inputs)
    }

    /// Like [`Graph::add_operation`], with a name for lookup and export.
    pub fn add_named_operation(&mut self, name: &str, op: Op, inputs: &[NodeId]) -> Result<NodeId> {
        self.insert_operation(Some(name.to_string()), op, inputs)
    }

    fn insert_operation(&mut self, name: Option<String>, op: Op, inputs: &[NodeId]) -> Result<NodeId> {
        let next = self.nodes.len();
        for &input in inputs {
            if input.graph() != self.id || input.index() > next {
                return Err(GraphError::ForeignNodeReference { node: input });
            }
            if input.index() == next {
                return Err(GraphError::CycleDetected { node: input });
            }
        }
        if inputs.len() != op.arity() {
            return Err(GraphError::ArityMismatch {
                op,
                expected: op.arity(),
                actual: inputs.len(),
            });
        }

        let id = self.push_node(name, NodeKind::Operation(op), inputs.to_vec(), None, None, None);
        for &input in inputs {
            let deps = &mut self.nodes[input.index()].dependents;
            // x * x lists x twice as input but only once as dependent
            if deps.last() != Some(&id) {
                deps.push(id);
            }
        }
        Ok(id)
    }

    fn push_node(
        &mut self,
        name: Option<String>,
        kind: NodeKind,
        inputs: Vec<NodeId>,
        dtype: Option<Dtype>,
        shape: Option<Shape>,
        value: Option<Value>,
    ) -> NodeId {
        let id = NodeId::new(self.id, self.nodes.len());
        if let Some(name) = &name {
            self.names.entry(name.clone()).or_default().push(id);
        }
        self.nodes.push(Node {
            id,
            name,
            kind,
            inputs,
            dependents: vec![],
            dtype,
            shape,
            value,
        });
        id
    }

    // === Operation shorthands ===

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Add, &[a, b])
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Sub, &[a, b])
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Mul, &[a, b])
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Div, &[a, b])
    }

    pub fn neg(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Neg, &[a])
    }

    pub fn exp(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Exp, &[a])
    }

    pub fn log(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Log, &[a])
    }

    pub fn sin(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Sin, &[a])
    }

    pub fn cos(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Cos, &[a])
    }

    pub fn tanh(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Tanh, &[a])
    }

    pub fn sqrt(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Sqrt, &[a])
    }

    pub fn pow(&mut self, a: NodeId, exponent: f64) -> Result<NodeId> {
        self.add_operation(Op::Pow { exponent }, &[a])
    }

    pub fn scale(&mut self, a: NodeId, factor: f64) -> Result<NodeId> {
        self.add_operation(Op::Scale { factor }, &[a])
    }

    pub fn sum(&mut self, a: NodeId) -> Result<NodeId> {
        self.add_operation(Op::Sum, &[a])
    }

    // === Values ===

    /// Assign a value to an input leaf.
    ///
    /// The first assignment fixes the dtype and shape of an undeclared leaf;
    /// later assignments must match them.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<()> {
        self.check(id)?;
        let node = &mut self.nodes[id.index()];
        if node.kind != NodeKind::Input {
            return Err(GraphError::NotAnInput { node: id });
        }
        if let Some(dtype) = node.dtype {
            if dtype != value.dtype() {
                return Err(GraphError::TypeMismatch {
                    expected: dtype,
                    actual: value.dtype(),
                });
            }
        }
        if let Some(shape) = &node.shape {
            if shape != value.shape() {
                return Err(GraphError::ShapeMismatch {
                    expected: shape.clone(),
                    actual: value.shape().clone(),
                });
            }
        }
        node.dtype = Some(value.dtype());
        node.shape = Some(value.shape().clone());
        node.value = Some(value);
        Ok(())
    }

    /// The node's current value, `None` until assigned or evaluated.
    pub fn value_of(&self, id: NodeId) -> Result<Option<&Value>> {
        Ok(self.node(id)?.value.as_ref())
    }

    /// Store an evaluation result. Only machines call this.
    pub(crate) fn store_value(&mut self, id: NodeId, value: Value) -> Result<()> {
        self.check(id)?;
        self.nodes[id.index()].value = Some(value);
        Ok(())
    }

    // === Lookup ===

    /// Get a node by handle.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.check(id)?;
        Ok(&self.nodes[id.index()])
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All nodes carrying `name`, in insertion order.
    pub fn by_name(&self, name: &str) -> &[NodeId] {
        self.names.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The symbolic gradient node bound to `input` by the last
    /// [`differentiate`](crate::differentiate) call that requested it.
    pub fn gradient_node(&self, input: NodeId) -> Option<NodeId> {
        self.grad_nodes.get(&input).copied()
    }

    /// Name an unnamed node. Named nodes keep their name.
    pub(crate) fn set_name(&mut self, id: NodeId, name: &str) {
        let node = &mut self.nodes[id.index()];
        if node.name.is_some() {
            return;
        }
        node.name = Some(name.to_string());
        let ids = self.names.entry(name.to_string()).or_default();
        ids.push(id);
        ids.sort();
    }

    pub(crate) fn bind_gradient(&mut self, input: NodeId, grad: NodeId) {
        self.grad_nodes.insert(input, grad);
    }

    /// Fail with `ForeignNodeReference` unless `id` names a node of this graph.
    pub fn check(&self, id: NodeId) -> Result<()> {
        if id.graph() != self.id || id.index() >= self.nodes.len() {
            return Err(GraphError::ForeignNodeReference { node: id });
        }
        Ok(())
    }

    // === Traversal ===

    /// Nodes without dependents.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.dependents.is_empty())
            .map(|n| n.id)
            .collect()
    }

    /// `roots` and every node they (transitively) read.
    pub fn ancestors(&self, roots: &[NodeId]) -> Result<HashSet<NodeId>> {
        self.reach(roots, |n| n.inputs.as_slice())
    }

    /// `roots` and every node that (transitively) reads them.
    pub fn descendants(&self, roots: &[NodeId]) -> Result<HashSet<NodeId>> {
        self.reach(roots, |n| n.dependents.as_slice())
    }

    fn reach<F>(&self, roots: &[NodeId], next: F) -> Result<HashSet<NodeId>>
    where
        F: Fn(&Node) -> &[NodeId],
    {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        for &root in roots {
            self.check(root)?;
            stack.push(root);
        }
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for &other in next(&self.nodes[id.index()]) {
                if !visited.contains(&other) {
                    stack.push(other);
                }
            }
        }
        Ok(visited)
    }

    /// Topological order of the whole graph.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        self.topological_order_of(|_| true)
    }

    /// Topological order of the nodes selected by `member`.
    ///
    /// Kahn's algorithm; among ready nodes the smallest id goes first, so the
    /// order is deterministic. Edges leaving the selection are ignored.
    pub fn topological_order_of<F>(&self, member: F) -> Result<Vec<NodeId>>
    where
        F: Fn(NodeId) -> bool,
    {
        let selected: Vec<bool> = self.nodes.iter().map(|n| member(n.id)).collect();
        let mut pending = vec![0usize; self.nodes.len()];
        let mut ready = BinaryHeap::new();
        let mut total = 0;

        for node in &self.nodes {
            let i = node.id.index();
            if !selected[i] {
                continue;
            }
            total += 1;
            pending[i] = node.inputs.iter().filter(|input| selected[input.index()]).count();
            if pending[i] == 0 {
                ready.push(Reverse(i));
            }
        }

        let mut order = Vec::with_capacity(total);
        while let Some(Reverse(i)) = ready.pop() {
            let node = &self.nodes[i];
            order.push(node.id);
            for dep in &node.dependents {
                let j = dep.index();
                if !selected[j] {
                    continue;
                }
                // a dependent lists each distinct input once, so count every matching edge
                let edges = self.nodes[j].inputs.iter().filter(|&&x| x == node.id).count();
                pending[j] -= edges;
                if pending[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        if order.len() != total {
            let stuck = (0..self.nodes.len())
                .find(|&i| selected[i] && pending[i] > 0)
                .map(|i| self.nodes[i].id)
                .unwrap_or_else(|| NodeId::new(self.id, 0));
            return Err(GraphError::CycleDetected { node: stuck });
        }
        Ok(order)
    }

    /// Drop every node at index `len` and above, with their name entries,
    /// dependent edges and gradient bindings.
    pub(crate) fn truncate(&mut self, len: usize) {
        if len >= self.nodes.len() {
            return;
        }
        self.nodes.truncate(len);
        for node in &mut self.nodes {
            node.dependents.retain(|d| d.index() < len);
        }
        for ids in self.names.values_mut() {
            ids.retain(|id| id.index() < len);
        }
        self.names.retain(|_, ids| !ids.is_empty());
        self.grad_nodes
            .retain(|input, grad| input.index() < len && grad.index() < len);
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

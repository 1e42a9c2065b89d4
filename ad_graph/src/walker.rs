//! Runtime reverse-mode differentiation.
//!
//! The [`GraphWalker`] interprets the graph directly: a forward sweep in
//! topological order computes every value, then a reverse sweep pushes
//! gradients from the outputs back to the leaves.
//!
//! The reverse sweep works in two steps:
//! 1. Seed each output with ones (d(output)/d(output) = 1)
//! 2. Traverse in reverse topological order, accumulating each node's
//!    contributions into its inputs with [`Op::local_gradient`]
//!
//! [`Op::local_gradient`]: crate::Op::local_gradient

use std::collections::HashSet;

use log::{debug, trace};

use crate::backend::NumericBackend;
use crate::error::{GraphError, Result};
use crate::gradients::Gradients;
use crate::graph::Graph;
use crate::machine::{ensure_open, evaluate, Machine, MachineState};
use crate::node::NodeId;
use crate::value::Value;

/// What a [`GraphWalker`] run does.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkerOptions {
    /// Run the forward sweep.
    pub forward: bool,
    /// Run the reverse sweep.
    pub backward: bool,
    /// Nodes seeded with ones in the reverse sweep. Empty means every sink.
    pub outputs: Vec<NodeId>,
}

impl Default for WalkerOptions {
    fn default() -> Self {
        WalkerOptions {
            forward: true,
            backward: true,
            outputs: Vec::new(),
        }
    }
}

impl WalkerOptions {
    /// Differentiate these outputs instead of every sink.
    pub fn with_outputs(mut self, outputs: &[NodeId]) -> Self {
        self.outputs = outputs.to_vec();
        self
    }

    /// Values only, no gradients.
    pub fn forward_only(mut self) -> Self {
        self.forward = true;
        self.backward = false;
        self
    }

    /// Gradients from the values already in the graph.
    pub fn backward_only(mut self) -> Self {
        self.forward = false;
        self.backward = true;
        self
    }
}

/// Evaluates a graph and its gradients by walking it.
///
/// ```
/// use ad_graph::prelude::*;
///
/// let mut g = Graph::new();
/// let x = g.add_scalar("x", Dtype::Float64);
/// let y = g.add_scalar("y", Dtype::Float64);
/// let z = g.mul(x, y).unwrap();
/// g.set_value(x, Value::scalar(2.0)).unwrap();
/// g.set_value(y, Value::scalar(2.5)).unwrap();
///
/// let mut m = GraphWalker::new(&mut g);
/// m.run().unwrap();
/// assert_eq!(m.value_of(z).unwrap().and_then(Value::as_scalar), Some(5.0));
/// assert_eq!(m.gradient_of(y).unwrap().and_then(Value::as_scalar), Some(2.0));
/// ```
#[derive(Debug)]
pub struct GraphWalker<'g> {
    graph: &'g mut Graph,
    options: WalkerOptions,
    gradients: Gradients,
    state: MachineState,
}

impl<'g> GraphWalker<'g> {
    /// Walker with default options: both sweeps, every sink as output.
    pub fn new(graph: &'g mut Graph) -> Self {
        Self::with_options(graph, WalkerOptions::default())
    }

    pub fn with_options(graph: &'g mut Graph, options: WalkerOptions) -> Self {
        GraphWalker {
            graph,
            options,
            gradients: Gradients::new(),
            state: MachineState::Uninitialized,
        }
    }

    pub fn options(&self) -> &WalkerOptions {
        &self.options
    }

    /// Gradients of the last reverse sweep.
    pub fn gradients(&self) -> &Gradients {
        &self.gradients
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    fn forward(&mut self) -> Result<()> {
        let order = self.graph.topological_order()?;
        for id in order {
            let node = self.graph.node(id)?;
            if let Some(op) = node.op() {
                let inputs = node.inputs().to_vec();
                evaluate(self.graph, id, op, &inputs)?;
            }
        }
        Ok(())
    }

    fn backward(&mut self) -> Result<()> {
        self.gradients.clear();
        // unset leaves with no dependents have nothing to seed
        let outputs = if self.options.outputs.is_empty() {
            let mut sinks = Vec::new();
            for id in self.graph.sinks() {
                let node = self.graph.node(id)?;
                if node.op().is_some() || node.value().is_some() {
                    sinks.push(id);
                }
            }
            sinks
        } else {
            self.options.outputs.clone()
        };

        let graph = &*self.graph;
        for &out in &outputs {
            let value = graph
                .value_of(out)?
                .ok_or(GraphError::UncomputedInput { node: out, input: out })?;
            self.gradients.accumulate(out, value.ones_like())?;
        }

        let relevant = graph.ancestors(&outputs)?;
        let order = graph.topological_order_of(|id| relevant.contains(&id))?;
        let mut reached: HashSet<NodeId> = outputs.iter().copied().collect();
        let mut backend = NumericBackend;

        for &id in order.iter().rev() {
            let node = graph.node(id)?;
            let Some(op) = node.op() else {
                continue;
            };
            let Some(seed) = self.gradients.get(id) else {
                continue;
            };

            let mut args = Vec::with_capacity(node.inputs().len());
            for &input in node.inputs() {
                match graph.value_of(input)? {
                    Some(v) => args.push(v),
                    None => return Err(GraphError::UncomputedInput { node: id, input }),
                }
            }
            let output = graph
                .value_of(id)?
                .ok_or(GraphError::UncomputedInput { node: id, input: id })?;

            let grads = op
                .local_gradient(&mut backend, &args, output, seed, &[])
                .map_err(|e| e.at_node(id))?;
            trace!("reverse {} ({}): seed {}", id, op, seed);
            for (&input, grad) in node.inputs().iter().zip(grads) {
                reached.insert(input);
                if let Some(grad) = grad {
                    self.gradients.accumulate(input, grad)?;
                }
            }
        }

        // reached only through edges without a gradient
        for id in reached {
            if let Some(value) = graph.value_of(id)? {
                self.gradients.insert_if_absent(id, value.zeros_like());
            }
        }
        Ok(())
    }
}

impl Machine for GraphWalker<'_> {
    fn run(&mut self) -> Result<()> {
        ensure_open(self.state)?;
        debug!(
            "graph walker: {} node(s), forward={} backward={}",
            self.graph.len(),
            self.options.forward,
            self.options.backward
        );
        if self.options.forward {
            self.forward()?;
        }
        if self.options.backward {
            self.backward()?;
            debug!("graph walker: {} gradient(s)", self.gradients.len());
        }
        self.state = MachineState::Ran;
        Ok(())
    }

    fn set_value(&mut self, node: NodeId, value: Value) -> Result<()> {
        ensure_open(self.state)?;
        self.graph.set_value(node, value)
    }

    fn value_of(&self, node: NodeId) -> Result<Option<&Value>> {
        ensure_open(self.state)?;
        self.graph.value_of(node)
    }

    fn gradient_of(&self, node: NodeId) -> Result<Option<&Value>> {
        ensure_open(self.state)?;
        self.graph.check(node)?;
        Ok(self.gradients.get(node))
    }

    fn state(&self) -> MachineState {
        self.state
    }

    fn close(&mut self) {
        self.gradients.clear();
        self.state = MachineState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Op;
    use crate::value::Dtype;
    use approx::assert_relative_eq;

    fn xy(op: Op) -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let y = g.add_scalar("y", Dtype::Float64);
        let z = g.add_operation(op, &[x, y]).unwrap();
        g.set_value(x, Value::scalar(2.0)).unwrap();
        g.set_value(y, Value::scalar(2.5)).unwrap();
        (g, x, y, z)
    }

    fn grad(m: &GraphWalker<'_>, node: NodeId) -> Option<f64> {
        m.gradient_of(node).unwrap().and_then(Value::as_scalar)
    }

    #[test]
    fn test_mul_forward_and_backward() {
        let (mut g, x, y, z) = xy(Op::Mul);
        let mut m = GraphWalker::new(&mut g);
        m.run().unwrap();
        assert_eq!(m.value_of(z).unwrap(), Some(&Value::scalar(5.0)));
        assert_eq!(grad(&m, x), Some(2.5));
        assert_eq!(grad(&m, y), Some(2.0));
        assert_eq!(grad(&m, z), Some(1.0));
    }

    #[test]
    fn test_add_gradients_are_one() {
        let (mut g, x, y, z) = xy(Op::Add);
        let mut m = GraphWalker::new(&mut g);
        m.run().unwrap();
        assert_eq!(m.value_of(z).unwrap(), Some(&Value::scalar(4.5)));
        assert_eq!(grad(&m, x), Some(1.0));
        assert_eq!(grad(&m, y), Some(1.0));
    }

    #[test]
    fn test_no_gradient_before_run() {
        let (mut g, x, _, _) = xy(Op::Mul);
        let m = GraphWalker::new(&mut g);
        assert_eq!(m.state(), MachineState::Uninitialized);
        assert_eq!(m.gradient_of(x).unwrap(), None);
    }

    #[test]
    fn test_forward_only_has_no_gradients() {
        let (mut g, x, _, z) = xy(Op::Mul);
        let mut m = GraphWalker::with_options(&mut g, WalkerOptions::default().forward_only());
        m.run().unwrap();
        assert!(m.value_of(z).unwrap().is_some());
        assert_eq!(m.gradient_of(x).unwrap(), None);
        assert!(m.gradients().is_empty());
    }

    #[test]
    fn test_backward_only_needs_values() {
        let (mut g, _, _, z) = xy(Op::Mul);
        let mut m = GraphWalker::with_options(&mut g, WalkerOptions::default().backward_only());
        assert_eq!(
            m.run(),
            Err(GraphError::UncomputedInput { node: z, input: z })
        );
    }

    #[test]
    fn test_chain_rule() {
        // z = (x + 1)^2, dz/dx = 2(x + 1)
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let one = g.add_constant(Value::scalar(1.0));
        let s = g.add(x, one).unwrap();
        let z = g.pow(s, 2.0).unwrap();
        g.set_value(x, Value::scalar(2.0)).unwrap();

        let mut m = GraphWalker::with_options(&mut g, WalkerOptions::default().with_outputs(&[z]));
        m.run().unwrap();
        assert_relative_eq!(grad(&m, x).unwrap(), 6.0);
        assert_relative_eq!(grad(&m, one).unwrap(), 6.0);
    }

    #[test]
    fn test_unreachable_node_has_no_gradient() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let y = g.add_scalar("y", Dtype::Float64);
        let z = g.exp(x).unwrap();
        let w = g.sin(y).unwrap();
        g.set_value(x, Value::scalar(0.0)).unwrap();
        g.set_value(y, Value::scalar(0.0)).unwrap();

        let mut m = GraphWalker::with_options(&mut g, WalkerOptions::default().with_outputs(&[z]));
        m.run().unwrap();
        assert_eq!(grad(&m, x), Some(1.0));
        assert_eq!(grad(&m, y), None);
        assert_eq!(grad(&m, w), None);
    }

    #[test]
    fn test_all_sinks_seeded_by_default() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let _a = g.scale(x, 2.0).unwrap();
        let _b = g.scale(x, 3.0).unwrap();
        g.set_value(x, Value::scalar(1.0)).unwrap();

        let mut m = GraphWalker::new(&mut g);
        m.run().unwrap();
        assert_eq!(grad(&m, x), Some(5.0));
    }

    #[test]
    fn test_unset_unused_leaf_is_not_seeded() {
        let (mut g, x, y, z) = xy(Op::Mul);
        let w = g.add_scalar("w", Dtype::Float64);

        let mut m = GraphWalker::new(&mut g);
        m.run().unwrap();
        assert_eq!(m.value_of(z).unwrap(), Some(&Value::scalar(5.0)));
        assert_eq!(grad(&m, x), Some(2.5));
        assert_eq!(grad(&m, y), Some(2.0));
        assert_eq!(grad(&m, w), None);
    }

    #[test]
    fn test_unset_designated_output_fails() {
        let (mut g, _, _, _) = xy(Op::Mul);
        let w = g.add_scalar("w", Dtype::Float64);

        let mut m = GraphWalker::with_options(&mut g, WalkerOptions::default().with_outputs(&[w]));
        assert_eq!(
            m.run(),
            Err(GraphError::UncomputedInput { node: w, input: w })
        );
    }

    #[test]
    fn test_gradient_less_edge_gives_zero() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let ones = g.add_operation(Op::OnesLike, &[x]).unwrap();
        let _f = g.scale(ones, 3.0).unwrap();
        g.set_value(x, Value::scalar(4.0)).unwrap();

        let mut m = GraphWalker::new(&mut g);
        m.run().unwrap();
        assert_eq!(grad(&m, ones), Some(3.0));
        assert_eq!(grad(&m, x), Some(0.0));
    }

    #[test]
    fn test_undefined_gradient_aborts() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let s = g.add_operation(Op::Sign, &[x]).unwrap();
        g.set_value(x, Value::scalar(-2.0)).unwrap();

        let mut m = GraphWalker::new(&mut g);
        assert_eq!(
            m.run(),
            Err(GraphError::GradientUndefined {
                node: Some(s),
                op: Op::Sign
            })
        );
    }

    #[test]
    fn test_rerun_resets_gradients() {
        let (mut g, x, y, z) = xy(Op::Mul);
        let mut m = GraphWalker::new(&mut g);
        m.run().unwrap();
        m.set_value(x, Value::scalar(3.0)).unwrap();
        m.run().unwrap();
        assert_eq!(m.value_of(z).unwrap(), Some(&Value::scalar(7.5)));
        assert_eq!(grad(&m, y), Some(3.0));
        assert_eq!(grad(&m, x), Some(2.5));
    }

    #[test]
    fn test_closed_walker_rejects_calls() {
        let (mut g, x, _, _) = xy(Op::Mul);
        let mut m = GraphWalker::new(&mut g);
        m.run().unwrap();
        m.close();
        assert!(m.gradients().is_empty());
        assert_eq!(m.run(), Err(GraphError::EngineClosed));
        assert_eq!(m.gradient_of(x), Err(GraphError::EngineClosed));
        assert_eq!(m.value_of(x), Err(GraphError::EngineClosed));
    }
}

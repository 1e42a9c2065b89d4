//! The interface shared by the tape machine and the graph walker.

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::NodeId;
use crate::ops::Op;
use crate::value::Value;

/// Lifecycle of a machine.
///
/// `Uninitialized -> Compiled (tape only) -> Ran -> Ran ... -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Uninitialized,
    Compiled,
    Ran,
    Closed,
}

/// An execution engine over a borrowed [`Graph`].
pub trait Machine {
    /// Evaluate the graph (and, depending on the machine, its gradients).
    fn run(&mut self) -> Result<()>;

    /// Assign a value to an input leaf of the underlying graph.
    fn set_value(&mut self, node: NodeId, value: Value) -> Result<()>;

    /// The node's value after the last run, or as assigned.
    fn value_of(&self, node: NodeId) -> Result<Option<&Value>>;

    /// The gradient of the differentiated output with respect to `node`.
    ///
    /// `Ok(None)` means "not computed", never a default zero.
    fn gradient_of(&self, node: NodeId) -> Result<Option<&Value>>;

    fn state(&self) -> MachineState;

    /// Release machine-held buffers. Every later call fails with `EngineClosed`.
    fn close(&mut self);
}

pub(crate) fn ensure_open(state: MachineState) -> Result<()> {
    if state == MachineState::Closed {
        return Err(GraphError::EngineClosed);
    }
    Ok(())
}

/// Evaluate one operation node from the current values of its inputs.
pub(crate) fn evaluate(graph: &mut Graph, node: NodeId, op: Op, inputs: &[NodeId]) -> Result<()> {
    let out = {
        let mut args = Vec::with_capacity(inputs.len());
        for &input in inputs {
            match graph.value_of(input)? {
                Some(v) => args.push(v),
                None => return Err(GraphError::UncomputedInput { node, input }),
            }
        }
        op.forward(&args).map_err(|e| e.at_node(node))?
    };
    log::trace!("{} = {} -> {}", node, op, out);
    graph.store_value(node, out)
}

//! Ahead-of-time compiled execution.
//!
//! A [`Tape`] is a linear list of instructions, one per operation node, in a
//! topological order of a graph snapshot. The [`TapeMachine`] replays it.
//!
//! Tapes are not invalidated automatically: after the graph grows (for example
//! by [`differentiate`](crate::differentiate)) a tape compiled earlier is stale
//! and only evaluates the snapshot it was built from. Recompile before reuse.

use std::fmt;

use log::{debug, warn};

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::machine::{ensure_open, evaluate, Machine, MachineState};
use crate::node::{GraphId, NodeId};
use crate::ops::Op;
use crate::value::Value;

/// One step of a tape: evaluate `op` on `inputs` and store the result on `node`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    node: NodeId,
    op: Op,
    inputs: Vec<NodeId>,
}

impl Instruction {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.node, self.op)?;
        for input in &self.inputs {
            write!(f, " {}", input)?;
        }
        Ok(())
    }
}

/// An immutable, precompiled execution order for a graph snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Tape {
    graph: GraphId,
    snapshot_len: usize,
    instructions: Vec<Instruction>,
}

impl Tape {
    /// Compile every operation node of the graph.
    pub fn compile(graph: &Graph) -> Result<Tape> {
        Self::build(graph, |_| true)
    }

    /// Compile only the operation nodes `outputs` depend on.
    pub fn compile_for(graph: &Graph, outputs: &[NodeId]) -> Result<Tape> {
        let needed = graph.ancestors(outputs)?;
        Self::build(graph, |id| needed.contains(&id))
    }

    fn build<F>(graph: &Graph, member: F) -> Result<Tape>
    where
        F: Fn(NodeId) -> bool,
    {
        let order = graph.topological_order_of(member)?;
        let mut instructions = Vec::with_capacity(order.len());
        for id in order {
            let node = graph.node(id)?;
            if let Some(op) = node.op() {
                instructions.push(Instruction {
                    node: id,
                    op,
                    inputs: node.inputs().to_vec(),
                });
            }
        }
        debug!(
            "compiled tape: {} instruction(s) over {} node(s)",
            instructions.len(),
            graph.len()
        );
        Ok(Tape {
            graph: graph.id(),
            snapshot_len: graph.len(),
            instructions,
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Identity of the graph this tape was compiled from.
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// True if the graph gained nodes since compilation.
    pub fn is_stale(&self, graph: &Graph) -> bool {
        graph.len() != self.snapshot_len
    }

    /// Evaluate every instruction in order, overwriting previous results.
    pub fn execute(&self, graph: &mut Graph) -> Result<()> {
        self.check_graph(graph)?;
        for instr in &self.instructions {
            evaluate(graph, instr.node, instr.op, &instr.inputs)?;
        }
        Ok(())
    }

    /// The tape must come from this graph, or from a clone no longer than it.
    fn check_graph(&self, graph: &Graph) -> Result<()> {
        if self.graph != graph.id() {
            if let Some(instr) = self.instructions.first() {
                return Err(GraphError::ForeignNodeReference { node: instr.node });
            }
        }
        if self.snapshot_len > graph.len() {
            if let Some(instr) = self.instructions.iter().find(|i| i.node.index() >= graph.len()) {
                return Err(GraphError::ForeignNodeReference { node: instr.node });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "{:>4}: {}", i, instr)?;
        }
        Ok(())
    }
}

/// Runs a compiled [`Tape`] over a borrowed graph.
///
/// Gradients are available only for inputs that were passed to
/// [`differentiate`](crate::differentiate) before compilation; they are the
/// values of the bound gradient nodes.
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
/// differentiate(&mut g, z, &[x, y]).unwrap();
///
/// let mut m = TapeMachine::new(&mut g);
/// m.run().unwrap();
/// assert_eq!(m.value_of(z).unwrap().and_then(Value::as_scalar), Some(5.0));
/// assert_eq!(m.gradient_of(x).unwrap().and_then(Value::as_scalar), Some(2.5));
/// ```
#[derive(Debug)]
pub struct TapeMachine<'g> {
    graph: &'g mut Graph,
    tape: Option<Tape>,
    state: MachineState,
}

impl<'g> TapeMachine<'g> {
    /// Create an uninitialized machine; the first `run` compiles.
    pub fn new(graph: &'g mut Graph) -> Self {
        TapeMachine {
            graph,
            tape: None,
            state: MachineState::Uninitialized,
        }
    }

    /// Use a tape compiled earlier, e.g. from [`Tape::compile_for`].
    pub fn with_tape(graph: &'g mut Graph, tape: Tape) -> Result<Self> {
        tape.check_graph(graph)?;
        Ok(TapeMachine {
            graph,
            tape: Some(tape),
            state: MachineState::Compiled,
        })
    }

    /// Compile (or recompile) the whole graph.
    pub fn compile(&mut self) -> Result<&Tape> {
        ensure_open(self.state)?;
        let tape = Tape::compile(self.graph)?;
        self.state = MachineState::Compiled;
        Ok(&*self.tape.insert(tape))
    }

    /// The current tape, if compiled.
    pub fn tape(&self) -> Option<&Tape> {
        self.tape.as_ref()
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Mutable access to the graph. Structural changes make the tape stale.
    pub fn graph_mut(&mut self) -> &mut Graph {
        self.graph
    }
}

impl Machine for TapeMachine<'_> {
    fn run(&mut self) -> Result<()> {
        ensure_open(self.state)?;
        if self.tape.is_none() {
            self.compile()?;
        }
        if let Some(tape) = &self.tape {
            if tape.is_stale(self.graph) {
                warn!(
                    "running a stale tape: compiled over {} node(s), graph now has {}",
                    tape.snapshot_len,
                    self.graph.len()
                );
            }
            debug!("tape machine: running {} instruction(s)", tape.len());
            tape.execute(self.graph)?;
            debug!("tape machine: run finished");
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
        match self.graph.gradient_node(node) {
            Some(grad) => self.graph.value_of(grad),
            None => Ok(None),
        }
    }

    fn state(&self) -> MachineState {
        self.state
    }

    fn close(&mut self) {
        self.tape = None;
        self.state = MachineState::Closed;
    }
}

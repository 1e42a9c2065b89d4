//! # ad_graph - Computation Graph Automatic Differentiation
//!
//! This crate builds explicit expression graphs over scalar and tensor values,
//! evaluates them, and computes gradients of an output with respect to any
//! input. Gradients come from one of two execution models that always agree:
//!
//! - **Symbolic**: [`differentiate`] extends the graph with nodes computing the
//!   gradients, and a [`TapeMachine`] runs the extended graph ahead-of-time.
//! - **Walking**: a [`GraphWalker`] evaluates the graph and performs a
//!   reverse sweep at runtime.
//!
//! ## Quick Start
//!
//! ```
//! use ad_graph::prelude::*;
//!
//! // z = x * y
//! let mut g = Graph::new();
//! let x = g.add_scalar("x", Dtype::Float64);
//! let y = g.add_scalar("y", Dtype::Float64);
//! let z = g.mul(x, y).unwrap();
//!
//! g.set_value(x, Value::scalar(2.0)).unwrap();
//! g.set_value(y, Value::scalar(2.5)).unwrap();
//!
//! // Automatic reverse mode
//! let mut walker = GraphWalker::new(&mut g);
//! walker.run().unwrap();
//! assert_eq!(walker.value_of(z).unwrap().and_then(Value::as_scalar), Some(5.0));
//!
//! // dz/dx = y = 2.5, dz/dy = x = 2
//! assert_eq!(walker.gradient_of(x).unwrap().and_then(Value::as_scalar), Some(2.5));
//! assert_eq!(walker.gradient_of(y).unwrap().and_then(Value::as_scalar), Some(2.0));
//! ```
//!
//! ## Supported Operations
//!
//! | Category | Operations |
//! |----------|------------|
//! | Arithmetic | [`Op::Add`], [`Op::Sub`], [`Op::Mul`], [`Op::Div`], [`Op::Neg`], [`Op::Scale`] |
//! | Power | [`Op::Pow`] (x^c for constant c), [`Op::Sqrt`] |
//! | Transcendental | [`Op::Exp`], [`Op::Log`], [`Op::Sin`], [`Op::Cos`], [`Op::Tanh`] |
//! | Reduction | [`Op::Sum`], [`Op::BroadcastLike`] |
//! | Structural | [`Op::OnesLike`], [`Op::ZerosLike`], [`Op::Sign`] (no gradient) |
//!
//! ## Architecture
//!
//! - **[`Graph`]**: arena of nodes addressed by [`NodeId`]; edges always point
//!   to earlier nodes, so the graph is acyclic by construction.
//! - **[`Op`]**: forward evaluation and local gradients, written once against
//!   [`GradBackend`] and shared by both execution models.
//! - **[`Machine`]**: the common interface of [`TapeMachine`] and [`GraphWalker`].
//! - **[`finite_diff_grad`]**: utility for validating gradients against numerical derivatives.
//!
//! ## Example: Symbolic Gradients
//!
//! ```
//! use ad_graph::prelude::*;
//!
//! // f(x, y) = x^2 * y + y^3
//! let mut g = Graph::new();
//! let x = g.add_scalar("x", Dtype::Float64);
//! let y = g.add_scalar("y", Dtype::Float64);
//! let x2 = g.pow(x, 2.0).unwrap();
//! let x2y = g.mul(x2, y).unwrap();
//! let y3 = g.pow(y, 3.0).unwrap();
//! let f = g.add(x2y, y3).unwrap();
//! g.set_value(x, Value::scalar(2.0)).unwrap();
//! g.set_value(y, Value::scalar(3.0)).unwrap();
//!
//! let grads = differentiate(&mut g, f, &[x, y]).unwrap();
//! let mut m = TapeMachine::new(&mut g);
//! m.run().unwrap();
//!
//! // df/dx = 2xy = 12
//! // df/dy = x^2 + 3y^2 = 4 + 27 = 31
//! assert!((m.value_of(grads[0]).unwrap().unwrap().as_scalar().unwrap() - 12.0).abs() < 1e-10);
//! assert!((m.gradient_of(y).unwrap().unwrap().as_scalar().unwrap() - 31.0).abs() < 1e-10);
//! ```

mod backend;
mod error;
mod export;
mod finite_diff;
mod gradients;
mod graph;
mod machine;
mod node;
mod ops;
mod shape;
mod symbolic;
mod tape;
mod value;
mod walker;

pub use backend::{GradBackend, NumericBackend};
pub use error::{GraphError, Result};
pub use export::{NodeSummary, ToDot};
pub use finite_diff::{finite_diff_grad, max_grad_error};
pub use gradients::Gradients;
pub use graph::Graph;
pub use machine::{Machine, MachineState};
pub use node::{GraphId, Node, NodeId, NodeKind};
pub use ops::Op;
pub use shape::Shape;
pub use symbolic::differentiate;
pub use tape::{Instruction, Tape, TapeMachine};
pub use value::{Dtype, Value};
pub use walker::{GraphWalker, WalkerOptions};

/// Everything needed to build, differentiate and run a graph.
pub mod prelude {
    pub use crate::{
        differentiate, finite_diff_grad, Dtype, Graph, GraphError, GraphWalker, Machine, NodeId,
        Op, Shape, Tape, TapeMachine, ToDot, Value, WalkerOptions,
    };
}

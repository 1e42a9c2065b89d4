//! Error types for graph construction, differentiation and evaluation.

use thiserror::Error;

use crate::node::NodeId;
use crate::ops::Op;
use crate::shape::Shape;
use crate::value::Dtype;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the graph, the differentiator and both machines.
///
/// Construction errors (`ArityMismatch`, `CycleDetected`, `ForeignNodeReference`,
/// `ShapeMismatch`, `TypeMismatch`, `NotAnInput`) leave the graph unchanged.
/// Evaluation errors abort the current run; values written earlier in that run
/// must not be relied upon.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Wrong number of inputs for an operation.
    #[error("{op} takes {expected} input(s), got {actual}")]
    ArityMismatch { op: Op, expected: usize, actual: usize },

    /// A value's shape conflicts with a declared or previously assigned shape.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    /// A value's element type conflicts with a declared or previously assigned type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: Dtype, actual: Dtype },

    /// An edge would not point to an earlier node.
    #[error("edge from {node} would create a cycle")]
    CycleDetected { node: NodeId },

    /// A handle that does not belong to this graph.
    #[error("{node} does not belong to this graph")]
    ForeignNodeReference { node: NodeId },

    /// Invalid numeric operation, e.g. elementwise op on incompatible shapes.
    #[error("domain error in {op}{}: {reason}", at(.node))]
    DomainError {
        node: Option<NodeId>,
        op: Op,
        reason: String,
    },

    /// The operation has no derivative rule.
    #[error("gradient of {op} is undefined{}", at(.node))]
    GradientUndefined { node: Option<NodeId>, op: Op },

    /// A requested input is not an ancestor of the differentiated output.
    #[error("{input} is not a predecessor of {output}")]
    NotAPredecessor { input: NodeId, output: NodeId },

    /// An instruction's input carries no value.
    #[error("{node} reads {input}, which has no value")]
    UncomputedInput { node: NodeId, input: NodeId },

    /// The machine was closed.
    #[error("machine is closed")]
    EngineClosed,

    /// Values can only be assigned to input leaves.
    #[error("{node} is not an input leaf")]
    NotAnInput { node: NodeId },

    /// Buffer length does not match the shape.
    #[error("data length mismatch: shape needs {expected} elements, got {actual}")]
    DataLength { expected: usize, actual: usize },

    /// Shapes must have positive dimensions.
    #[error("invalid shape {shape}: dimensions must be positive")]
    InvalidShape { shape: Shape },

    /// A scalar output was required.
    #[error("{node} has shape {shape}, expected a scalar")]
    NonScalarOutput { node: NodeId, shape: Shape },
}

impl GraphError {
    /// Attach the failing node to evaluation errors raised by pure op code.
    pub(crate) fn at_node(self, id: NodeId) -> Self {
        match self {
            GraphError::DomainError {
                node: None,
                op,
                reason,
            } => GraphError::DomainError {
                node: Some(id),
                op,
                reason,
            },
            GraphError::GradientUndefined { node: None, op } => GraphError::GradientUndefined {
                node: Some(id),
                op,
            },
            other => other,
        }
    }
}

fn at(node: &Option<NodeId>) -> String {
    node.map(|n| format!(" at {n}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_node_fills_domain_error() {
        let err = GraphError::DomainError {
            node: None,
            op: Op::Add,
            reason: "shapes (2,) and (3,) differ".to_string(),
        };
        let id = NodeId::new_for_test(4);
        match err.at_node(id) {
            GraphError::DomainError { node, .. } => assert_eq!(node, Some(id)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_at_node_keeps_existing_node() {
        let first = NodeId::new_for_test(1);
        let err = GraphError::GradientUndefined {
            node: Some(first),
            op: Op::Sign,
        };
        assert_eq!(
            err.at_node(NodeId::new_for_test(2)),
            GraphError::GradientUndefined {
                node: Some(first),
                op: Op::Sign
            }
        );
    }

    #[test]
    fn test_display() {
        let err = GraphError::ArityMismatch {
            op: Op::Mul,
            expected: 2,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Mul takes 2 input(s), got 3");
        assert_eq!(GraphError::EngineClosed.to_string(), "machine is closed");
    }
}

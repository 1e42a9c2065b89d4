//! Gradient backends.
//!
//! Local gradients are written once, in [`Op::local_gradient`], against the
//! [`GradBackend`] trait. Each backend decides what a "value" is:
//!
//! - [`NumericBackend`] computes [`Value`]s directly (used by the graph walker);
//! - the symbolic backend appends operation nodes to a graph and returns their
//!   ids (used by [`differentiate`](crate::differentiate)).
//!
//! Both backends ultimately run the same [`Op::forward`] calls, which is what
//! makes the two differentiation modes agree.

use crate::error::Result;
use crate::ops::Op;
use crate::value::Value;

/// Target of local-gradient construction.
pub trait GradBackend {
    /// Representation of an intermediate result.
    type Repr: Clone;

    /// Apply an operation to already built arguments.
    fn apply(&mut self, op: Op, args: &[&Self::Repr]) -> Result<Self::Repr>;

    fn add(&mut self, a: &Self::Repr, b: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Add, &[a, b])
    }

    fn sub(&mut self, a: &Self::Repr, b: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Sub, &[a, b])
    }

    fn mul(&mut self, a: &Self::Repr, b: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Mul, &[a, b])
    }

    fn div(&mut self, a: &Self::Repr, b: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Div, &[a, b])
    }

    fn neg(&mut self, a: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Neg, &[a])
    }

    fn sin(&mut self, a: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Sin, &[a])
    }

    fn cos(&mut self, a: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Cos, &[a])
    }

    fn pow(&mut self, a: &Self::Repr, exponent: f64) -> Result<Self::Repr> {
        self.apply(Op::Pow { exponent }, &[a])
    }

    fn scale(&mut self, a: &Self::Repr, factor: f64) -> Result<Self::Repr> {
        self.apply(Op::Scale { factor }, &[a])
    }

    fn sum(&mut self, a: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::Sum, &[a])
    }

    fn broadcast_like(&mut self, scalar: &Self::Repr, like: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::BroadcastLike, &[scalar, like])
    }

    fn ones_like(&mut self, a: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::OnesLike, &[a])
    }

    fn zeros_like(&mut self, a: &Self::Repr) -> Result<Self::Repr> {
        self.apply(Op::ZerosLike, &[a])
    }
}

/// Evaluates gradients eagerly on values.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericBackend;

impl GradBackend for NumericBackend {
    type Repr = Value;

    fn apply(&mut self, op: Op, args: &[&Value]) -> Result<Value> {
        op.forward(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn test_numeric_helpers() {
        let mut b = NumericBackend;
        let x = Value::scalar(3.0);
        let y = Value::scalar(4.0);
        assert_eq!(b.add(&x, &y).unwrap().as_scalar(), Some(7.0));
        assert_eq!(b.sub(&x, &y).unwrap().as_scalar(), Some(-1.0));
        assert_eq!(b.mul(&x, &y).unwrap().as_scalar(), Some(12.0));
        assert_eq!(b.div(&y, &x).unwrap().as_scalar(), Some(4.0 / 3.0));
        assert_eq!(b.pow(&x, 2.0).unwrap().as_scalar(), Some(9.0));
        assert_eq!(b.scale(&x, -2.0).unwrap().as_scalar(), Some(-6.0));
    }

    #[test]
    fn test_numeric_broadcast_and_sum() {
        let mut b = NumericBackend;
        let t = Value::from_vec(vec![1.0, 2.0, 3.0], Shape::new(vec![3])).unwrap();
        let s = b.sum(&t).unwrap();
        assert_eq!(s.as_scalar(), Some(6.0));
        let spread = b.broadcast_like(&Value::scalar(0.5), &t).unwrap();
        assert_eq!(spread.data(), &[0.5, 0.5, 0.5]);
        assert_eq!(b.ones_like(&t).unwrap().data(), &[1.0, 1.0, 1.0]);
        assert_eq!(b.zeros_like(&t).unwrap().data(), &[0.0, 0.0, 0.0]);
    }
}

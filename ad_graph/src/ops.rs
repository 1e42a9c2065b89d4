//! The operation registry.
//!
//! Every operation knows how to evaluate itself ([`Op::forward`]) and how to
//! push an output gradient back to its inputs ([`Op::local_gradient`]). Both
//! machines and the symbolic differentiator consult only these two functions.

use std::fmt;

use crate::backend::GradBackend;
use crate::error::{GraphError, Result};
use crate::value::Value;

/// The operation performed by an operation node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Addition: inputs[0] + inputs[1]
    Add,
    /// Subtraction: inputs[0] - inputs[1]
    Sub,
    /// Multiplication: inputs[0] * inputs[1]
    Mul,
    /// Division: inputs[0] / inputs[1]
    Div,
    /// Negation: -inputs[0]
    Neg,
    /// Exponential: exp(inputs[0])
    Exp,
    /// Natural logarithm: ln(inputs[0])
    Log,
    /// Sine: sin(inputs[0])
    Sin,
    /// Cosine: cos(inputs[0])
    Cos,
    /// Hyperbolic tangent: tanh(inputs[0])
    Tanh,
    /// Square root: sqrt(inputs[0])
    Sqrt,
    /// Power with constant exponent: inputs[0]^exponent
    Pow { exponent: f64 },
    /// Multiplication by a constant: factor * inputs[0]
    Scale { factor: f64 },
    /// Sum of all elements, producing a scalar.
    Sum,
    /// Scalar inputs[0] repeated to the shape of inputs[1].
    BroadcastLike,
    /// Ones with the shape of inputs[0].
    OnesLike,
    /// Zeros with the shape of inputs[0].
    ZerosLike,
    /// Elementwise sign. Has no derivative rule.
    Sign,
}

impl Op {
    /// Number of inputs the operation takes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::BroadcastLike => 2,
            Op::Neg
            | Op::Exp
            | Op::Log
            | Op::Sin
            | Op::Cos
            | Op::Tanh
            | Op::Sqrt
            | Op::Pow { .. }
            | Op::Scale { .. }
            | Op::Sum
            | Op::OnesLike
            | Op::ZerosLike
            | Op::Sign => 1,
        }
    }

    /// Operation name without parameters.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::Neg => "Neg",
            Op::Exp => "Exp",
            Op::Log => "Log",
            Op::Sin => "Sin",
            Op::Cos => "Cos",
            Op::Tanh => "Tanh",
            Op::Sqrt => "Sqrt",
            Op::Pow { .. } => "Pow",
            Op::Scale { .. } => "Scale",
            Op::Sum => "Sum",
            Op::BroadcastLike => "BroadcastLike",
            Op::OnesLike => "OnesLike",
            Op::ZerosLike => "ZerosLike",
            Op::Sign => "Sign",
        }
    }

    /// Whether [`Op::local_gradient`] has a rule for this operation.
    pub fn is_differentiable(&self) -> bool {
        !matches!(self, Op::Sign)
    }

    /// Evaluate the operation. Pure: never touches the graph.
    pub fn forward(&self, inputs: &[&Value]) -> Result<Value> {
        if inputs.len() != self.arity() {
            return Err(GraphError::ArityMismatch {
                op: *self,
                expected: self.arity(),
                actual: inputs.len(),
            });
        }
        let a = inputs[0];
        let out = match *self {
            Op::Add => self.elementwise(a, inputs[1], |x, y| x + y)?,
            Op::Sub => self.elementwise(a, inputs[1], |x, y| x - y)?,
            Op::Mul => self.elementwise(a, inputs[1], |x, y| x * y)?,
            Op::Div => self.elementwise(a, inputs[1], |x, y| x / y)?,
            Op::Neg => a.map(|x| -x),
            Op::Exp => a.map(f64::exp),
            Op::Log => a.map(f64::ln),
            Op::Sin => a.map(f64::sin),
            Op::Cos => a.map(f64::cos),
            Op::Tanh => a.map(f64::tanh),
            Op::Sqrt => a.map(f64::sqrt),
            Op::Pow { exponent } => a.map(|x| x.powf(exponent)),
            Op::Scale { factor } => a.map(|x| factor * x),
            Op::Sum => a.sum(),
            Op::BroadcastLike => {
                let like = inputs[1];
                let Some(fill) = a.as_scalar() else {
                    return Err(self.domain(format!(
                        "expected a scalar to broadcast, got shape {}",
                        a.shape()
                    )));
                };
                if a.dtype() != like.dtype() {
                    return Err(self.domain(format!(
                        "dtypes {} and {} differ",
                        a.dtype(),
                        like.dtype()
                    )));
                }
                Value::full(a.dtype(), like.shape().clone(), fill)?
            }
            Op::OnesLike => a.ones_like(),
            Op::ZerosLike => a.zeros_like(),
            Op::Sign => a.map(|x| {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    x
                }
            }),
        };
        Ok(out)
    }

    /// Chain rule for one node: `contribution_i = seed * d(output)/d(input_i)`.
    ///
    /// `inputs` and `output` are the node's forward operands and result in the
    /// backend's representation, `seed` the gradient flowing into the node.
    /// Contributions are only built for inputs where `needs[i]` is true
    /// (missing entries count as true). `None` means no gradient flows
    /// through that edge.
    pub fn local_gradient<B: GradBackend>(
        &self,
        backend: &mut B,
        inputs: &[&B::Repr],
        output: &B::Repr,
        seed: &B::Repr,
        needs: &[bool],
    ) -> Result<Vec<Option<B::Repr>>> {
        if inputs.len() != self.arity() {
            return Err(GraphError::ArityMismatch {
                op: *self,
                expected: self.arity(),
                actual: inputs.len(),
            });
        }
        let need = |i: usize| needs.get(i).copied().unwrap_or(true);
        let mut grads: Vec<Option<B::Repr>> = vec![None; inputs.len()];
        let b = backend;

        match *self {
            Op::Add => {
                // z = a + b: dz/da = 1, dz/db = 1
                if need(0) {
                    grads[0] = Some(seed.clone());
                }
                if need(1) {
                    grads[1] = Some(seed.clone());
                }
            }
            Op::Sub => {
                // z = a - b: dz/da = 1, dz/db = -1
                if need(0) {
                    grads[0] = Some(seed.clone());
                }
                if need(1) {
                    grads[1] = Some(b.neg(seed)?);
                }
            }
            Op::Mul => {
                // z = a * b: dz/da = b, dz/db = a
                if need(0) {
                    grads[0] = Some(b.mul(seed, inputs[1])?);
                }
                if need(1) {
                    grads[1] = Some(b.mul(seed, inputs[0])?);
                }
            }
            Op::Div => {
                // z = a / b: dz/da = 1/b, dz/db = -a/b^2 = -z/b
                if need(0) {
                    grads[0] = Some(b.div(seed, inputs[1])?);
                }
                if need(1) {
                    let scaled = b.mul(seed, output)?;
                    let quotient = b.div(&scaled, inputs[1])?;
                    grads[1] = Some(b.neg(&quotient)?);
                }
            }
            Op::Neg => {
                if need(0) {
                    grads[0] = Some(b.neg(seed)?);
                }
            }
            Op::Exp => {
                // d(exp(a))/da = exp(a), which is the output
                if need(0) {
                    grads[0] = Some(b.mul(seed, output)?);
                }
            }
            Op::Log => {
                if need(0) {
                    grads[0] = Some(b.div(seed, inputs[0])?);
                }
            }
            Op::Sin => {
                if need(0) {
                    let cos = b.cos(inputs[0])?;
                    grads[0] = Some(b.mul(seed, &cos)?);
                }
            }
            Op::Cos => {
                if need(0) {
                    let sin = b.sin(inputs[0])?;
                    let scaled = b.mul(seed, &sin)?;
                    grads[0] = Some(b.neg(&scaled)?);
                }
            }
            Op::Tanh => {
                // d(tanh(a))/da = 1 - tanh(a)^2
                if need(0) {
                    let ones = b.ones_like(output)?;
                    let squared = b.mul(output, output)?;
                    let local = b.sub(&ones, &squared)?;
                    grads[0] = Some(b.mul(seed, &local)?);
                }
            }
            Op::Sqrt => {
                // d(sqrt(a))/da = 1 / (2 sqrt(a))
                if need(0) {
                    let twice = b.scale(output, 2.0)?;
                    grads[0] = Some(b.div(seed, &twice)?);
                }
            }
            Op::Pow { exponent } => {
                // d(a^c)/da = c * a^(c-1)
                if need(0) {
                    let lowered = b.pow(inputs[0], exponent - 1.0)?;
                    let local = b.scale(&lowered, exponent)?;
                    grads[0] = Some(b.mul(seed, &local)?);
                }
            }
            Op::Scale { factor } => {
                if need(0) {
                    grads[0] = Some(b.scale(seed, factor)?);
                }
            }
            Op::Sum => {
                if need(0) {
                    grads[0] = Some(b.broadcast_like(seed, inputs[0])?);
                }
            }
            Op::BroadcastLike => {
                // inputs[1] only contributes its shape
                if need(0) {
                    grads[0] = Some(b.sum(seed)?);
                }
            }
            Op::OnesLike | Op::ZerosLike => {}
            Op::Sign => {
                return Err(GraphError::GradientUndefined {
                    node: None,
                    op: *self,
                })
            }
        }

        Ok(grads)
    }

    fn elementwise<F>(&self, a: &Value, b: &Value, f: F) -> Result<Value>
    where
        F: Fn(f64, f64) -> f64,
    {
        a.check_compatible(b)
            .map_err(|e| self.domain(e.to_string()))?;
        Ok(a.zip_with(b, f))
    }

    fn domain(&self, reason: String) -> GraphError {
        GraphError::DomainError {
            node: None,
            op: *self,
            reason,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Pow { exponent } => write!(f, "Pow({})", exponent),
            Op::Scale { factor } => write!(f, "Scale({})", factor),
            other => write!(f, "{}", other.name()),
        }
    }
}

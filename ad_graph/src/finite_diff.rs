//! Finite difference utilities for gradient verification.
//!
//! Provides numerical gradient computation for testing autodiff correctness.

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::NodeId;
use crate::tape::Tape;
use crate::value::Value;

/// Compute gradients of a scalar `output` using central finite differences.
///
/// Every element of every input is perturbed by `eps` in both directions on
/// a private snapshot of the graph; `graph` itself is left untouched. All
/// inputs must already hold values.
///
/// # Returns
/// One value per input, shaped like that input: `[d(output)/d(input_i)]`.
///
/// # Example
/// ```
/// use ad_graph::prelude::*;
///
/// // f(x, y) = x^2 + y^2
/// // df/dx = 2x, df/dy = 2y
/// let mut g = Graph::new();
/// let x = g.add_scalar("x", Dtype::Float64);
/// let y = g.add_scalar("y", Dtype::Float64);
/// let xx = g.mul(x, x).unwrap();
/// let yy = g.mul(y, y).unwrap();
/// let f = g.add(xx, yy).unwrap();
/// g.set_value(x, Value::scalar(3.0)).unwrap();
/// g.set_value(y, Value::scalar(4.0)).unwrap();
///
/// let grads = finite_diff_grad(&g, f, &[x, y], 1e-6).unwrap();
/// assert!((grads[0].as_scalar().unwrap() - 6.0).abs() < 1e-5); // df/dx at x=3
/// assert!((grads[1].as_scalar().unwrap() - 8.0).abs() < 1e-5); // df/dy at y=4
/// ```
pub fn finite_diff_grad(graph: &Graph, output: NodeId, inputs: &[NodeId], eps: f64) -> Result<Vec<Value>> {
    let mut snapshot = graph.clone();
    let tape = Tape::compile_for(&snapshot, &[output])?;

    tape.execute(&mut snapshot)?;
    if let Some(value) = snapshot.value_of(output)? {
        if !value.is_scalar() {
            return Err(GraphError::NonScalarOutput {
                node: output,
                shape: value.shape().clone(),
            });
        }
    }

    let mut grads = Vec::with_capacity(inputs.len());
    for &input in inputs {
        let point = match snapshot.value_of(input)? {
            Some(v) => v.clone(),
            None => return Err(GraphError::UncomputedInput { node: output, input }),
        };
        let mut partials = Vec::with_capacity(point.numel());
        let mut perturbed = point.data().to_vec();

        for i in 0..perturbed.len() {
            // Central difference: (f(x + eps) - f(x - eps)) / (2 * eps)
            perturbed[i] = point.data()[i] + eps;
            let f_plus = eval_at(&mut snapshot, &tape, output, input, &point, &perturbed)?;

            perturbed[i] = point.data()[i] - eps;
            let f_minus = eval_at(&mut snapshot, &tape, output, input, &point, &perturbed)?;

            perturbed[i] = point.data()[i]; // restore

            partials.push((f_plus - f_minus) / (2.0 * eps));
        }

        snapshot.set_value(input, point.clone())?;
        grads.push(Value::with_dtype(point.dtype(), partials, point.shape().clone())?);
    }

    Ok(grads)
}

fn eval_at(
    graph: &mut Graph,
    tape: &Tape,
    output: NodeId,
    input: NodeId,
    point: &Value,
    data: &[f64],
) -> Result<f64> {
    let value = Value::with_dtype(point.dtype(), data.to_vec(), point.shape().clone())?;
    graph.set_value(input, value)?;
    tape.execute(graph)?;
    let out = graph
        .value_of(output)?
        .and_then(Value::as_scalar)
        .ok_or(GraphError::UncomputedInput { node: output, input: output })?;
    Ok(out)
}

/// Compute the maximum absolute elementwise difference between two gradient lists.
///
/// Useful for comparing autodiff gradients against finite difference gradients.
/// Lists of different length, or values of different shape, are infinitely apart.
pub fn max_grad_error(grad1: &[Value], grad2: &[Value]) -> f64 {
    if grad1.len() != grad2.len() {
        return f64::INFINITY;
    }
    let mut worst = 0.0;
    for (a, b) in grad1.iter().zip(grad2.iter()) {
        if a.shape() != b.shape() {
            return f64::INFINITY;
        }
        worst = a
            .data()
            .iter()
            .zip(b.data().iter())
            .map(|(x, y)| (x - y).abs())
            .fold(worst, f64::max);
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dtype;

    #[test]
    fn test_finite_diff_quadratic() {
        // f(x, y) = x^2 + 2*x*y + y^2
        // df/dx = 2x + 2y
        // df/dy = 2x + 2y
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let y = g.add_scalar("y", Dtype::Float64);
        let s = g.add(x, y).unwrap();
        let f = g.pow(s, 2.0).unwrap();
        g.set_value(x, Value::scalar(1.0)).unwrap();
        g.set_value(y, Value::scalar(2.0)).unwrap();

        let grads = finite_diff_grad(&g, f, &[x, y], 1e-6).unwrap();
        assert!((grads[0].as_scalar().unwrap() - 6.0).abs() < 1e-5); // 2*1 + 2*2 = 6
        assert!((grads[1].as_scalar().unwrap() - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_finite_diff_transcendental() {
        // f(x) = sin(x) * exp(x)
        // df/dx = (cos(x) + sin(x)) * exp(x)
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let s = g.sin(x).unwrap();
        let e = g.exp(x).unwrap();
        let f = g.mul(s, e).unwrap();
        g.set_value(x, Value::scalar(1.0)).unwrap();

        let grads = finite_diff_grad(&g, f, &[x], 1e-6).unwrap();
        let expected = (1.0_f64.cos() + 1.0_f64.sin()) * 1.0_f64.exp();
        assert!((grads[0].as_scalar().unwrap() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_finite_diff_tensor_input() {
        // f(v) = sum(v * v), df/dv = 2v
        let mut g = Graph::new();
        let v = g.add_leaf("v");
        let sq = g.mul(v, v).unwrap();
        let f = g.sum(sq).unwrap();
        g.set_value(v, Value::from_vec(vec![1.0, -0.5], vec![2].into()).unwrap())
            .unwrap();

        let grads = finite_diff_grad(&g, f, &[v], 1e-6).unwrap();
        assert_eq!(grads[0].shape().dims(), &[2]);
        assert!((grads[0].data()[0] - 2.0).abs() < 1e-5);
        assert!((grads[0].data()[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_leaves_graph_untouched() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let f = g.exp(x).unwrap();
        g.set_value(x, Value::scalar(0.5)).unwrap();

        finite_diff_grad(&g, f, &[x], 1e-6).unwrap();
        assert_eq!(g.value_of(x).unwrap(), Some(&Value::scalar(0.5)));
        assert_eq!(g.value_of(f).unwrap(), None);
    }

    #[test]
    fn test_non_scalar_output() {
        let mut g = Graph::new();
        let v = g.add_leaf("v");
        let f = g.exp(v).unwrap();
        g.set_value(v, Value::from_vec(vec![1.0, 2.0], vec![2].into()).unwrap())
            .unwrap();

        assert!(matches!(
            finite_diff_grad(&g, f, &[v], 1e-6),
            Err(GraphError::NonScalarOutput { .. })
        ));
    }

    #[test]
    fn test_max_grad_error() {
        let g1 = vec![Value::scalar(1.0), Value::from_vec(vec![2.0, 3.0], vec![2].into()).unwrap()];
        let g2 = vec![Value::scalar(1.1), Value::from_vec(vec![2.0, 2.8], vec![2].into()).unwrap()];

        let err = max_grad_error(&g1, &g2);
        assert!((err - 0.2).abs() < 1e-10);
        assert_eq!(max_grad_error(&g1, &g2[..1]), f64::INFINITY);
    }
}

//! Symbolic reverse-mode differentiation.
//!
//! [`differentiate`] extends a graph with nodes computing the gradient of an
//! output with respect to chosen inputs. It only builds structure; the values
//! appear after an engine runs the extended graph.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::backend::GradBackend;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::NodeId;
use crate::ops::Op;

/// Builds gradient expressions as graph nodes.
struct SymbolicBackend<'g> {
    graph: &'g mut Graph,
}

impl GradBackend for SymbolicBackend<'_> {
    type Repr = NodeId;

    fn apply(&mut self, op: Op, args: &[&NodeId]) -> Result<NodeId> {
        let inputs: Vec<NodeId> = args.iter().map(|&&id| id).collect();
        self.graph.add_operation(op, &inputs)
    }
}

/// Append nodes computing `d(output)/d(input)` for each of `inputs`.
///
/// Returns one gradient node per requested input, in the same order, and binds
/// each to its input (see [`Graph::gradient_node`]). An input that influences
/// `output` only through edges without a gradient gets a `ZerosLike` node.
///
/// # Errors
///
/// - `ForeignNodeReference` for handles of another graph.
/// - `NotAPredecessor` if an input is not an ancestor of `output`.
/// - `GradientUndefined` if a gradient must pass through an operation without a
///   derivative rule.
///
/// On error the graph is restored to its state before the call.
pub fn differentiate(graph: &mut Graph, output: NodeId, inputs: &[NodeId]) -> Result<Vec<NodeId>> {
    graph.check(output)?;
    for &input in inputs {
        graph.check(input)?;
    }
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let mark = graph.len();
    match build(graph, output, inputs) {
        Ok(grads) => {
            debug!(
                "differentiate {}: {} gradient(s), {} node(s) added",
                output,
                grads.len(),
                graph.len() - mark
            );
            Ok(grads)
        }
        Err(e) => {
            graph.truncate(mark);
            Err(e)
        }
    }
}

fn build(graph: &mut Graph, output: NodeId, inputs: &[NodeId]) -> Result<Vec<NodeId>> {
    let ancestors = graph.ancestors(&[output])?;
    if let Some(&input) = inputs.iter().find(|i| !ancestors.contains(i)) {
        return Err(GraphError::NotAPredecessor { input, output });
    }
    let relevant: HashSet<NodeId> = graph
        .descendants(inputs)?
        .intersection(&ancestors)
        .copied()
        .collect();
    let order = graph.topological_order_of(|id| relevant.contains(&id))?;

    let mut backend = SymbolicBackend { graph };
    let seed = backend.ones_like(&output)?;

    // node -> gradient contributions, in arrival order
    let mut pending: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    pending.insert(output, vec![seed]);
    let mut totals: HashMap<NodeId, NodeId> = HashMap::new();

    for &id in order.iter().rev() {
        let Some(contributions) = pending.remove(&id) else {
            continue;
        };
        let Some(total) = fold_sum(&mut backend, contributions)? else {
            continue;
        };
        totals.insert(id, total);

        let node = backend.graph.node(id)?;
        let Some(op) = node.op() else {
            continue;
        };
        let node_inputs = node.inputs().to_vec();
        let needs: Vec<bool> = node_inputs.iter().map(|i| relevant.contains(i)).collect();
        let args: Vec<&NodeId> = node_inputs.iter().collect();

        let grads = op
            .local_gradient(&mut backend, &args, &id, &total, &needs)
            .map_err(|e| e.at_node(id))?;
        for (&input, grad) in node_inputs.iter().zip(grads) {
            if let Some(grad) = grad {
                pending.entry(input).or_default().push(grad);
            }
        }
    }

    let mut results = Vec::with_capacity(inputs.len());
    for input in inputs {
        let grad = match totals.get(input) {
            Some(&grad) => grad,
            None => backend.zeros_like(input)?,
        };
        results.push(grad);
    }

    let graph = backend.graph;
    let out_name = graph.node(output)?.name().map(str::to_string);
    for (&input, &grad) in inputs.iter().zip(&results) {
        graph.bind_gradient(input, grad);

        // a node shared by several results (or the seed of `x + y`) stays unnamed
        let shared = results.iter().filter(|&&g| g == grad).count() > 1;
        if shared {
            continue;
        }
        let in_name = graph.node(input)?.name().map(str::to_string);
        if let (Some(out), Some(inp)) = (&out_name, in_name) {
            graph.set_name(grad, &format!("d{}/d{}", out, inp));
        }
    }
    Ok(results)
}

/// Left fold of `Add` nodes; a single contribution is used as is.
fn fold_sum(backend: &mut SymbolicBackend<'_>, contributions: Vec<NodeId>) -> Result<Option<NodeId>> {
    let mut iter = contributions.into_iter();
    let Some(mut acc) = iter.next() else {
        return Ok(None);
    };
    for next in iter {
        acc = backend.add(&acc, &next)?;
    }
    Ok(Some(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::tape::TapeMachine;
    use crate::value::{Dtype, Value};
    use approx::assert_relative_eq;

    fn mul_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let y = g.add_scalar("y", Dtype::Float64);
        let z = g.add_named_operation("z", Op::Mul, &[x, y]).unwrap();
        g.set_value(x, Value::scalar(2.0)).unwrap();
        g.set_value(y, Value::scalar(2.5)).unwrap();
        (g, x, y, z)
    }

    fn scalar(m: &TapeMachine<'_>, node: NodeId) -> f64 {
        m.value_of(node).unwrap().and_then(Value::as_scalar).unwrap()
    }

    #[test]
    fn test_mul_gradients() {
        let (mut g, x, y, z) = mul_graph();
        let grads = differentiate(&mut g, z, &[x, y]).unwrap();
        assert_eq!(grads.len(), 2);
        assert_eq!(g.gradient_node(x), Some(grads[0]));
        assert_eq!(g.gradient_node(y), Some(grads[1]));
        assert_eq!(g.by_name("dz/dx"), &[grads[0]]);
        assert_eq!(g.by_name("dz/dy"), &[grads[1]]);

        let mut m = TapeMachine::new(&mut g);
        m.run().unwrap();
        assert_eq!(scalar(&m, z), 5.0);
        assert_eq!(scalar(&m, grads[0]), 2.5);
        assert_eq!(scalar(&m, grads[1]), 2.0);
    }

    #[test]
    fn test_builds_structure_only() {
        let (mut g, x, y, z) = mul_graph();
        let grads = differentiate(&mut g, z, &[x, y]).unwrap();
        assert_eq!(g.value_of(z).unwrap(), None);
        assert_eq!(g.value_of(grads[0]).unwrap(), None);
    }

    #[test]
    fn test_add_shares_seed() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let y = g.add_scalar("y", Dtype::Float64);
        let z = g.add_named_operation("z", Op::Add, &[x, y]).unwrap();
        let grads = differentiate(&mut g, z, &[x, y]).unwrap();

        assert_eq!(grads[0], grads[1]);
        assert_eq!(g.node(grads[0]).unwrap().op(), Some(Op::OnesLike));
        assert_eq!(g.node(grads[0]).unwrap().name(), None);

        g.set_value(x, Value::scalar(2.0)).unwrap();
        g.set_value(y, Value::scalar(2.5)).unwrap();
        let mut m = TapeMachine::new(&mut g);
        m.run().unwrap();
        assert_eq!(m.value_of(z).unwrap(), Some(&Value::scalar(4.5)));
        assert_eq!(m.gradient_of(x).unwrap(), Some(&Value::scalar(1.0)));
        assert_eq!(m.gradient_of(y).unwrap(), Some(&Value::scalar(1.0)));
    }

    #[test]
    fn test_multiple_paths_fold_with_add() {
        // f = x * x + x, df/dx = 2x + 1
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let sq = g.mul(x, x).unwrap();
        let f = g.add(sq, x).unwrap();
        g.set_value(x, Value::scalar(3.0)).unwrap();

        let grads = differentiate(&mut g, f, &[x]).unwrap();
        assert_eq!(g.node(grads[0]).unwrap().op(), Some(Op::Add));

        let mut m = TapeMachine::new(&mut g);
        m.run().unwrap();
        assert_relative_eq!(scalar(&m, grads[0]), 7.0);
    }

    #[test]
    fn test_chain_through_transcendentals() {
        // f = sin(x) * exp(y), df/dx = cos(x) exp(y), df/dy = sin(x) exp(y)
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let y = g.add_scalar("y", Dtype::Float64);
        let s = g.sin(x).unwrap();
        let e = g.exp(y).unwrap();
        let f = g.mul(s, e).unwrap();
        g.set_value(x, Value::scalar(0.7)).unwrap();
        g.set_value(y, Value::scalar(-0.3)).unwrap();

        let grads = differentiate(&mut g, f, &[x, y]).unwrap();
        let mut m = TapeMachine::new(&mut g);
        m.run().unwrap();
        assert_relative_eq!(scalar(&m, grads[0]), 0.7f64.cos() * (-0.3f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(scalar(&m, grads[1]), 0.7f64.sin() * (-0.3f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_not_a_predecessor() {
        let (mut g, x, _, _) = mul_graph();
        let w = g.add_scalar("w", Dtype::Float64);
        let before = g.len();
        let z = g.by_name("z")[0];
        assert_eq!(
            differentiate(&mut g, z, &[x, w]),
            Err(GraphError::NotAPredecessor { input: w, output: z })
        );
        assert_eq!(g.len(), before);
    }

    #[test]
    fn test_undefined_gradient_rolls_back() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let s = g.add_operation(Op::Sign, &[x]).unwrap();
        let f = g.mul(s, x).unwrap();
        let before = g.len();

        let err = differentiate(&mut g, f, &[x]).unwrap_err();
        assert_eq!(
            err,
            GraphError::GradientUndefined {
                node: Some(s),
                op: Op::Sign
            }
        );
        assert_eq!(g.len(), before);
        assert_eq!(g.gradient_node(x), None);
        assert_eq!(g.node(x).unwrap().dependents(), &[s, f]);
    }

    #[test]
    fn test_gradient_less_path_gives_zeros() {
        let mut g = Graph::new();
        let x = g.add_scalar("x", Dtype::Float64);
        let ones = g.add_operation(Op::OnesLike, &[x]).unwrap();
        let f = g.scale(ones, 3.0).unwrap();
        g.set_value(x, Value::scalar(4.0)).unwrap();

        let grads = differentiate(&mut g, f, &[x]).unwrap();
        assert_eq!(g.node(grads[0]).unwrap().op(), Some(Op::ZerosLike));

        let mut m = TapeMachine::new(&mut g);
        m.run().unwrap();
        assert_eq!(scalar(&m, grads[0]), 0.0);
    }

    #[test]
    fn test_output_wrt_itself_is_one() {
        let (mut g, _, _, z) = mul_graph();
        let grads = differentiate(&mut g, z, &[z]).unwrap();
        let mut m = TapeMachine::new(&mut g);
        m.run().unwrap();
        assert_eq!(scalar(&m, grads[0]), 1.0);
    }

    #[test]
    fn test_foreign_output_rejected() {
        let (mut g, x, _, _) = mul_graph();
        let (_, _, _, stranger) = mul_graph();
        assert!(matches!(
            differentiate(&mut g, stranger, &[x]),
            Err(GraphError::ForeignNodeReference { .. })
        ));
    }

    #[test]
    fn test_tensor_sum_gradient() {
        let mut g = Graph::new();
        let v = g.add_leaf("v");
        let sq = g.mul(v, v).unwrap();
        let total = g.sum(sq).unwrap();
        g.set_value(
            v,
            Value::from_vec(vec![1.0, -2.0, 3.0], vec![3].into()).unwrap(),
        )
        .unwrap();

        let grads = differentiate(&mut g, total, &[v]).unwrap();
        let mut m = TapeMachine::new(&mut g);
        m.run().unwrap();
        let grad = m.value_of(grads[0]).unwrap().unwrap();
        assert_eq!(grad.data(), &[2.0, -4.0, 6.0]);
    }
}

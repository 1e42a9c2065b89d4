//! Gradient storage for the graph walker.

use std::collections::HashMap;

use crate::error::Result;
use crate::node::NodeId;
use crate::value::Value;

/// Container for accumulated gradients.
///
/// Stores gradients keyed by [`NodeId`], with in-place accumulation for nodes
/// reached through several paths. A node without an entry has no gradient
/// ("not computed"), which is different from a zero gradient.
#[derive(Debug, Clone, Default)]
pub struct Gradients {
    grads: HashMap<NodeId, Value>,
}

impl Gradients {
    /// Create empty gradient container.
    pub fn new() -> Self {
        Self {
            grads: HashMap::new(),
        }
    }

    /// Accumulate gradient for a node.
    ///
    /// If a gradient already exists, adds to it (sum rule for multiple paths).
    pub fn accumulate(&mut self, id: NodeId, grad: Value) -> Result<()> {
        if let Some(existing) = self.grads.get_mut(&id) {
            existing.accumulate(&grad)?;
        } else {
            self.grads.insert(id, grad);
        }
        Ok(())
    }

    /// Insert a gradient unless the node already has one.
    pub fn insert_if_absent(&mut self, id: NodeId, grad: Value) {
        self.grads.entry(id).or_insert(grad);
    }

    /// Get gradient for a node.
    pub fn get(&self, id: NodeId) -> Option<&Value> {
        self.grads.get(&id)
    }

    /// Check if gradient exists for node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.grads.contains_key(&id)
    }

    /// Number of stored gradients.
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// Forget every gradient.
    pub fn clear(&mut self) {
        self.grads.clear();
    }

    /// Iterate over all gradients.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Value)> {
        self.grads.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::shape::Shape;

    #[test]
    fn test_gradients_new() {
        let grads = Gradients::new();
        assert!(grads.is_empty());
        assert_eq!(grads.len(), 0);
    }

    #[test]
    fn test_accumulate_sums_paths() {
        let mut grads = Gradients::new();
        let id = NodeId::new_for_test(0);
        let g1 = Value::from_vec(vec![1.0, 2.0, 3.0], Shape::new(vec![3])).unwrap();
        let g2 = Value::from_vec(vec![4.0, 5.0, 6.0], Shape::new(vec![3])).unwrap();

        grads.accumulate(id, g1).unwrap();
        grads.accumulate(id, g2).unwrap();

        assert_eq!(grads.get(id).unwrap().data(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_accumulate_shape_mismatch() {
        let mut grads = Gradients::new();
        let id = NodeId::new_for_test(0);
        grads.accumulate(id, Value::scalar(1.0)).unwrap();
        let wide = Value::from_vec(vec![1.0, 1.0], Shape::new(vec![2])).unwrap();
        assert!(matches!(
            grads.accumulate(id, wide),
            Err(GraphError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let mut grads = Gradients::new();
        let id = NodeId::new_for_test(1);
        grads.accumulate(id, Value::scalar(3.0)).unwrap();
        grads.insert_if_absent(id, Value::scalar(0.0));
        assert_eq!(grads.get(id).and_then(Value::as_scalar), Some(3.0));

        let other = NodeId::new_for_test(2);
        grads.insert_if_absent(other, Value::scalar(0.0));
        assert_eq!(grads.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut grads = Gradients::new();
        grads.accumulate(NodeId::new_for_test(0), Value::scalar(1.0)).unwrap();
        grads.clear();
        assert!(!grads.contains(NodeId::new_for_test(0)));
        assert_eq!(grads.iter().count(), 0);
    }
}

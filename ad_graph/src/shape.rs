//! Shapes of values.

use std::fmt;

use crate::error::{GraphError, Result};

/// Dimensions of a value, outermost first. No dimensions means a scalar.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The shape of a scalar.
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    /// Rank.
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Size along `axis`, if the shape has that axis.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.0.get(axis).copied()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Element count; 1 for a scalar.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Fails with `InvalidShape` if any dimension is zero.
    pub fn validate(&self) -> Result<()> {
        match self.0.iter().any(|&d| d == 0) {
            true => Err(GraphError::InvalidShape { shape: self.clone() }),
            false => Ok(()),
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape{}", self)
    }
}

/// Tuple notation: `()`, `(3,)`, `(2, 3)`.
impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "()"),
            [n] => write!(f, "({},)", n),
            [first, rest @ ..] => {
                write!(f, "({}", first)?;
                for d in rest {
                    write!(f, ", {}", d)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

//! Typed numeric payloads carried by graph nodes.

use std::fmt;

use crate::error::{GraphError, Result};
use crate::shape::Shape;

/// Element type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dtype {
    /// 32-bit float. Elements are rounded through `f32` after every operation.
    Float32,
    /// 64-bit float.
    #[default]
    Float64,
}

impl Dtype {
    /// Round an element to the precision of this type.
    #[inline]
    pub fn round(self, x: f64) -> f64 {
        match self {
            Dtype::Float32 => x as f32 as f64,
            Dtype::Float64 => x,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::Float32 => write!(f, "float32"),
            Dtype::Float64 => write!(f, "float64"),
        }
    }
}

/// A scalar or dense tensor of a fixed element type.
///
/// Data is stored row-major in an `f64` buffer whatever the dtype; the
/// invariant `data.len() == shape.numel()` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    dtype: Dtype,
    shape: Shape,
    data: Vec<f64>,
}

impl Value {
    /// A float64 scalar.
    pub fn scalar(value: f64) -> Self {
        Value {
            dtype: Dtype::Float64,
            shape: Shape::scalar(),
            data: vec![value],
        }
    }

    /// A float32 scalar.
    pub fn scalar_f32(value: f32) -> Self {
        Value {
            dtype: Dtype::Float32,
            shape: Shape::scalar(),
            data: vec![value as f64],
        }
    }

    /// A float64 tensor from row-major data.
    pub fn from_vec(data: Vec<f64>, shape: Shape) -> Result<Self> {
        Self::with_dtype(Dtype::Float64, data, shape)
    }

    /// A tensor of the given dtype from row-major data.
    pub fn with_dtype(dtype: Dtype, data: Vec<f64>, shape: Shape) -> Result<Self> {
        shape.validate()?;
        if data.len() != shape.numel() {
            return Err(GraphError::DataLength {
                expected: shape.numel(),
                actual: data.len(),
            });
        }
        let data = data.into_iter().map(|x| dtype.round(x)).collect();
        Ok(Value { dtype, shape, data })
    }

    /// A value of the given shape with every element set to `fill`.
    pub fn full(dtype: Dtype, shape: Shape, fill: f64) -> Result<Self> {
        shape.validate()?;
        let data = vec![dtype.round(fill); shape.numel()];
        Ok(Value { dtype, shape, data })
    }

    /// Ones with the same dtype and shape.
    pub fn ones_like(&self) -> Self {
        self.filled(1.0)
    }

    /// Zeros with the same dtype and shape.
    pub fn zeros_like(&self) -> Self {
        self.filled(0.0)
    }

    fn filled(&self, fill: f64) -> Self {
        Value {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: vec![self.dtype.round(fill); self.data.len()],
        }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Row-major elements.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_scalar()
    }

    /// The element of a scalar value, `None` for tensors.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.is_scalar() {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Sum of all elements, as a scalar of the same dtype.
    pub fn sum(&self) -> Value {
        let total = self.data.iter().sum::<f64>();
        Value {
            dtype: self.dtype,
            shape: Shape::scalar(),
            data: vec![self.dtype.round(total)],
        }
    }

    /// Apply `f` elementwise.
    pub fn map<F>(&self, f: F) -> Value
    where
        F: Fn(f64) -> f64,
    {
        Value {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| self.dtype.round(f(x))).collect(),
        }
    }

    /// Combine two values elementwise.
    ///
    /// Callers check compatibility first; see [`Value::check_compatible`].
    pub(crate) fn zip_with<F>(&self, other: &Value, f: F) -> Value
    where
        F: Fn(f64, f64) -> f64,
    {
        debug_assert_eq!(self.shape, other.shape);
        Value {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| self.dtype.round(f(a, b)))
                .collect(),
        }
    }

    /// Check that `other` has this value's dtype and shape.
    pub fn check_compatible(&self, other: &Value) -> Result<()> {
        if self.dtype != other.dtype {
            return Err(GraphError::TypeMismatch {
                expected: self.dtype,
                actual: other.dtype,
            });
        }
        if self.shape != other.shape {
            return Err(GraphError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        Ok(())
    }

    /// Add `other` into this value in place (gradient accumulation).
    pub fn accumulate(&mut self, other: &Value) -> Result<()> {
        self.check_compatible(other)?;
        let dtype = self.dtype;
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a = dtype.round(*a + b);
        }
        Ok(())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::scalar(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::scalar_f32(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(x) = self.as_scalar() {
            return write!(f, "{}", x);
        }
        write!(f, "[")?;
        for (i, x) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", x)?;
        }
        write!(f, "] {}", self.shape)
    }
}

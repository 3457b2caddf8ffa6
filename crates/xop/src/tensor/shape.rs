//! Lightweight wrapper for tensor shapes and dimension bookkeeping.

use std::fmt;

use crate::error::{KernelError, KernelResult};

/// Stores the logical dimensions of a tensor. An empty dimension list is a scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Builds a shape from signed dims as they arrive over a foreign boundary.
    ///
    /// Negative dims are rejected rather than wrapped.
    pub fn from_foreign(dims: &[i64]) -> KernelResult<Self> {
        let mut out = Vec::with_capacity(dims.len());
        for (axis, &dim) in dims.iter().enumerate() {
            let dim = usize::try_from(dim).map_err(|_| {
                KernelError::invalid(format!(
                    "foreign shape {dims:?} has negative dimension at axis {axis}"
                ))
            })?;
            out.push(dim);
        }
        Ok(Shape { dims: out })
    }

    /// Converts the dims into the signed representation used on the wire.
    pub fn to_foreign(&self) -> Vec<i64> {
        self.dims.iter().map(|&dim| dim as i64).collect()
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Like [`Shape::num_elements`] but reports overflow instead of wrapping.
    pub fn checked_num_elements(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_one_element() {
        assert_eq!(Shape::scalar().num_elements(), 1);
        assert_eq!(Shape::scalar().rank(), 0);
    }

    #[test]
    fn negative_foreign_dims_are_rejected() {
        let err = Shape::from_foreign(&[2, -1]).unwrap_err();
        assert!(err.to_string().contains("axis 1"));
        assert_eq!(
            Shape::from_foreign(&[2, 3]).unwrap().dims(),
            &[2usize, 3][..]
        );
    }
}

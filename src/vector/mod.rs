//! State-vector representation.
//!
//! A `StateVector` is an arbitrary-dimension point in the model's state
//! space (storage, soil moisture layers, routing cells, ...). Unlike a
//! fixed-size physics vector, its dimension is a runtime property fixed by
//! configuration, so operations that combine two vectors check that their
//! dimensions agree and return a [`DimensionMismatch`] error rather than
//! silently truncating or zero-padding.

pub mod math;
pub mod ops;

/// An error produced when two `StateVector`s of different dimension are
/// combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("state vector dimension mismatch: {lhs} vs {rhs}")]
pub struct DimensionMismatch {
    pub lhs: usize,
    pub rhs: usize,
}

/// A point in the model's state space.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StateVector(pub Vec<f64>);

impl StateVector {
    /// Builds a state vector from its components.
    pub fn new(components: Vec<f64>) -> Self {
        StateVector(components)
    }

    /// Builds a zero vector of the given dimension.
    pub fn zeros(dim: usize) -> Self {
        StateVector(vec![0.0; dim])
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    fn check_dim(&self, other: &StateVector) -> Result<(), DimensionMismatch> {
        if self.dim() != other.dim() {
            Err(DimensionMismatch {
                lhs: self.dim(),
                rhs: other.dim(),
            })
        } else {
            Ok(())
        }
    }
}

impl std::ops::Index<usize> for StateVector {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.0[i]
    }
}

impl std::ops::IndexMut<usize> for StateVector {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.0[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_has_requested_dim() {
        let v = StateVector::zeros(4);
        assert_eq!(v.dim(), 4);
        assert!(v.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn index_reads_and_writes() {
        let mut v = StateVector::new(vec![1.0, 2.0, 3.0]);
        v[1] = 9.0;
        assert_eq!(v[1], 9.0);
    }
}

//! Norms, distances and averaging helpers for `StateVector`.

use super::{DimensionMismatch, StateVector};

impl StateVector {
    pub fn norm_squared(&self) -> f64 {
        self.0.iter().map(|x| x * x).sum()
    }

    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    pub fn dot(&self, other: &StateVector) -> Result<f64, DimensionMismatch> {
        self.check_dim(other)?;
        Ok(self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum())
    }

    pub fn euclidean_distance(&self, other: &StateVector) -> Result<f64, DimensionMismatch> {
        Ok(self.try_sub(other)?.norm())
    }

    pub fn approx_eq(&self, other: &StateVector, epsilon: f64) -> bool {
        self.dim() == other.dim()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| (a - b).abs() <= epsilon)
    }

    /// Weighted elementwise mean of a slice of state vectors. All vectors
    /// must share the same dimension and `weights` must be non-empty and
    /// sum to a positive value.
    pub fn weighted_mean(
        vectors: &[StateVector],
        weights: &[f64],
    ) -> Result<StateVector, DimensionMismatch> {
        assert_eq!(vectors.len(), weights.len(), "vectors/weights length mismatch");
        let dim = vectors[0].dim();
        let mut acc = vec![0.0; dim];
        let mut weight_sum = 0.0;
        for (v, &w) in vectors.iter().zip(weights) {
            if v.dim() != dim {
                return Err(DimensionMismatch { lhs: dim, rhs: v.dim() });
            }
            for (a, x) in acc.iter_mut().zip(&v.0) {
                *a += w * x;
            }
            weight_sum += w;
        }
        for a in acc.iter_mut() {
            *a /= weight_sum;
        }
        Ok(StateVector(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_of_unit_vector() {
        let v = StateVector::new(vec![1.0, 0.0, 0.0]);
        assert!((v.norm() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weighted_mean_with_equal_weights_is_plain_average() {
        let vs = vec![
            StateVector::new(vec![0.0, 0.0]),
            StateVector::new(vec![2.0, 4.0]),
        ];
        let mean = StateVector::weighted_mean(&vs, &[1.0, 1.0]).unwrap();
        assert!(mean.approx_eq(&StateVector::new(vec![1.0, 2.0]), 1e-12));
    }

    #[test]
    fn weighted_mean_skews_toward_heavier_sample() {
        let vs = vec![
            StateVector::new(vec![0.0]),
            StateVector::new(vec![10.0]),
        ];
        let mean = StateVector::weighted_mean(&vs, &[9.0, 1.0]).unwrap();
        assert!((mean[0] - 1.0).abs() < 1e-9);
    }
}

//! Observation likelihood model (§4.E): a single-parameter Gaussian used to
//! weight particles against the latest streamflow observation.

use crate::error::StatsError;

const SQRT_2PI: f64 = 2.5066282746310002;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Normal {
    pub mean: f64,
    pub stdev: f64,
}

impl Normal {
    /// Fails with `InvalidWeights` when `stdev` is not a positive, finite
    /// number (§4.B's convention for invalid-input errors applies here too).
    pub fn new(mean: f64, stdev: f64) -> Result<Self, StatsError> {
        if !(stdev > 0.0) || !stdev.is_finite() {
            return Err(StatsError::InvalidWeights);
        }
        Ok(Normal { mean, stdev })
    }

    /// Density at `x`, used directly as an observation likelihood weight.
    pub fn pdf(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.stdev;
        (-0.5 * z * z).exp() / (self.stdev * SQRT_2PI)
    }
}

//! Particle and Ensemble: the unit of the filter's weighted sample set.

use crate::vector::StateVector;

/// A single weighted ensemble member.
///
/// `id` follows the naming convention used when particles are produced by
/// resampling: a fresh particle is `"Particle {index}"`, while a particle
/// produced by resampling an existing member carries `"{orig_id} - resample
/// {n}"` so its lineage stays visible in reports.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Particle {
    pub id: String,
    pub state: StateVector,
    pub weight: f64,
}

impl Particle {
    pub fn new(id: impl Into<String>, state: StateVector, weight: f64) -> Self {
        Particle {
            id: id.into(),
            state,
            weight,
        }
    }

    pub fn resample_id(orig_id: &str, n: usize) -> String {
        format!("{orig_id} - resample {n}")
    }
}

/// A weighted sample set representing the filter's belief at a single
/// timestamp.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Ensemble {
    pub particles: Vec<Particle>,
}

impl Ensemble {
    pub fn new(particles: Vec<Particle>) -> Self {
        Ensemble { particles }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    /// Replaces every particle's weight with `1.0`, used when every particle
    /// failed to register any weight (§4.G step 2, "Uniformise" — the source
    /// never normalises, so the uniform weight is exactly `1.0`, not `1/n`).
    pub fn uniformize_weights(&mut self) {
        for p in self.particles.iter_mut() {
            p.weight = 1.0;
        }
    }

    /// Normalizes weights so they sum to 1. No-op on an empty ensemble.
    pub fn normalize_weights(&mut self) {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        if sum <= 0.0 {
            return;
        }
        for p in self.particles.iter_mut() {
            p.weight /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_id_embeds_lineage() {
        assert_eq!(Particle::resample_id("Particle 3", 2), "Particle 3 - resample 2");
    }

    #[test]
    fn uniformize_sets_weight_to_one() {
        let mut ens = Ensemble::new(vec![
            Particle::new("a", StateVector::zeros(1), 0.9),
            Particle::new("b", StateVector::zeros(1), 0.1),
        ]);
        ens.uniformize_weights();
        assert!(ens.particles.iter().all(|p| (p.weight - 1.0).abs() < 1e-12));
    }

    #[test]
    fn normalize_weights_sums_to_one() {
        let mut ens = Ensemble::new(vec![
            Particle::new("a", StateVector::zeros(1), 2.0),
            Particle::new("b", StateVector::zeros(1), 2.0),
        ]);
        ens.normalize_weights();
        let sum: f64 = ens.weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }
}

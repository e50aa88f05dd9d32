//! The particle-filter update (§4.G): advance an ensemble by one
//! assimilation step, weight it against an observation, and resample /
//! perturb the posterior.
//!
//! Step 1 (simulate) is the one step with no sequential RNG dependency, so
//! it runs across a `rayon` pool. Every step after it runs against a single
//! seeded RNG so two runs with the same seed produce byte-identical
//! posteriors (testable property 5 — determinism).

use rand::{Rng, RngCore};
use rayon::prelude::*;

use crate::distributions::Normal;
use crate::error::FilterError;
use crate::kde::multivar::{BandwidthMode, MultiVarKernelDensity};
use crate::model::ModelRunner;
use crate::particle::{Ensemble, Particle};
use crate::stats::weighted_resample_indices;
use crate::vector::StateVector;

/// Behaviour knobs for a single filter update, mirroring the configuration
/// table in §6 (`doResample`, `doPerturb`, `fClassKernels`).
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    pub do_resample: bool,
    pub do_perturb: bool,
    pub bandwidth_mode: BandwidthMode,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            do_resample: true,
            do_perturb: true,
            bandwidth_mode: BandwidthMode::Diagonal,
        }
    }
}

/// A staged particle: the result of running the model once, before
/// resampling/perturbation. A failed model run is kept (not dropped) with
/// `output: None` and `weight: 0.0`, so a fully-failed ensemble still
/// uniformises to a valid posterior rather than erroring.
struct Staged {
    id: String,
    state: StateVector,
    output: Option<f64>,
    weight: f64,
}

/// The result of a filter update: the posterior ensemble plus the
/// observation-variable's weighted mean across the particles that actually
/// produced output, i.e. the model's estimate of that variable at this
/// timestamp before resampling/perturbation reshuffles the state each
/// particle carries forward.
#[derive(Debug, Clone)]
pub struct FilterUpdate {
    pub ensemble: Ensemble,
    pub weighted_output_mean: f64,
}

/// Runs the update: simulate, weight, uniformise-if-degenerate,
/// resample-or-not, perturb-or-not. Returns a posterior ensemble of
/// `output_size` particles.
///
/// `observation_variable` names which of the model's scalar outputs the
/// observation likelihood is computed against (almost always discharge).
/// `output_size` (`N'`) is the desired size of the returned ensemble, which
/// need not match `prior`'s size (`N`).
pub fn update<M: ModelRunner>(
    model: &M,
    prior: &Ensemble,
    observation: Normal,
    observation_variable: &str,
    output_size: usize,
    config: FilterConfig,
    rng: &mut impl RngCore,
) -> Result<FilterUpdate, FilterError> {
    if prior.is_empty() {
        return Err(FilterError::EmptyEnsemble);
    }

    // Step 1: simulate. Independent of RNG order, so this is the one step
    // safe to run with bounded data parallelism. Every particle is staged
    // under "Particle {i+1}" regardless of the source particle's own id
    // (§4.G step 1), so downstream reporting can re-associate streamflow by
    // this convention (§4.H).
    let staged: Vec<Staged> = prior
        .particles
        .par_iter()
        .enumerate()
        .map(|(i, particle)| {
            let id = format!("Particle {}", i + 1);
            match model.run_model(i + 1, &particle.state) {
                Ok(result) => {
                    let output = result.output.get(observation_variable).copied();
                    let weight = output.map(|o| observation.pdf(o)).unwrap_or(0.0);
                    Staged {
                        id,
                        state: result.state,
                        output,
                        weight,
                    }
                }
                Err(_) => Staged {
                    id,
                    state: particle.state.clone(),
                    output: None,
                    weight: 0.0,
                },
            }
        })
        .collect();

    let output_weight_sum: f64 = staged.iter().filter(|s| s.output.is_some()).map(|s| s.weight).sum();
    let weighted_output_mean = if output_weight_sum > 0.0 {
        staged
            .iter()
            .filter_map(|s| s.output.map(|o| s.weight * o))
            .sum::<f64>()
            / output_weight_sum
    } else {
        f64::NAN
    };

    let particles: Vec<Particle> = staged
        .iter()
        .map(|s| Particle::new(s.id.clone(), s.state.clone(), s.weight))
        .collect();
    let mut ensemble = Ensemble::new(particles);

    // Step 2: uniformise only if every particle failed to register any
    // weight at all. The source never normalises implicitly, so real
    // likelihood information is never discarded on the basis of an assumed
    // degeneracy threshold.
    let weight_sum: f64 = ensemble.weights().iter().sum();
    if weight_sum == 0.0 {
        ensemble.uniformize_weights();
    }

    // Step 3: no resample — take a uniform random subset without
    // replacement of size min(N, N'), returned in original index order.
    if !config.do_resample {
        let keep = output_size.min(ensemble.len());
        let mut order = shuffled_indices(ensemble.len(), rng);
        order.truncate(keep);
        order.sort_unstable();
        let particles = order.into_iter().map(|i| ensemble.particles[i].clone()).collect();
        return Ok(FilterUpdate {
            ensemble: Ensemble::new(particles),
            weighted_output_mean,
        });
    }

    // Step 4: resample with replacement to exactly N' particles.
    let weights = ensemble.weights();
    let indices = weighted_resample_indices(&weights, output_size, rng)?;

    let mut counts = std::collections::HashMap::<usize, usize>::new();
    let mut order = Vec::new();
    for &i in &indices {
        let count = counts.entry(i).or_insert(0);
        if *count == 0 {
            order.push(i);
        }
        *count += 1;
    }

    // Step 5: perturb. The bandwidth is fit once over the staged (pre-
    // resample) particles that carry nonzero weight; each resampled
    // particle's first copy stays exactly at its own center, and its k-1
    // extra copies are perturbed around that same center (not a fresh
    // weighted base draw).
    let kde = if config.do_perturb {
        let nonzero: Vec<&Particle> = ensemble.particles.iter().filter(|p| p.weight > 0.0).collect();
        let states: Vec<StateVector> = nonzero.iter().map(|p| p.state.clone()).collect();
        let weights_nz: Vec<f64> = nonzero.iter().map(|p| p.weight).collect();
        Some(MultiVarKernelDensity::new(states, weights_nz, config.bandwidth_mode)?)
    } else {
        None
    };

    let mut particles = Vec::with_capacity(output_size);
    for idx in order {
        let src = &ensemble.particles[idx];
        let k = counts[&idx];
        for copy in 0..k {
            if copy == 0 {
                particles.push(Particle::new(src.id.clone(), src.state.clone(), 1.0));
            } else {
                let id = Particle::resample_id(&src.id, copy);
                let state = match &kde {
                    Some(kde) => add_noise(&src.state, &kde.sample_noise(rng)),
                    None => src.state.clone(),
                };
                particles.push(Particle::new(id, state, 1.0));
            }
        }
    }

    Ok(FilterUpdate {
        ensemble: Ensemble::new(particles),
        weighted_output_mean,
    })
}

/// Fisher-Yates shuffle of `0..n`, used to draw a uniform random subset
/// without replacement (§4.G step 3).
fn shuffled_indices(n: usize, rng: &mut impl RngCore) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.random_range(0..=i);
        indices.swap(i, j);
    }
    indices
}

fn add_noise(state: &StateVector, noise: &[f64]) -> StateVector {
    StateVector::new(state.as_slice().iter().zip(noise).map(|(s, n)| s + n).collect())
}

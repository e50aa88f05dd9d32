//! Forecast engine (§4.I): fans an assimilated ensemble out over a lead-time
//! horizon with bounded parallelism and a wall-clock deadline, folding each
//! particle's samples into per-timestamp kernel density buckets.
//!
//! Uses a `crossbeam_channel` bounded work queue rather than `rayon`,
//! because the engine must stop waiting and report whatever completed once
//! the deadline passes — `select!` over a work-result channel and a
//! `channel::after` deadline expresses that directly, where rayon's pool has
//! no per-call cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded};

use crate::error::ForecastError;
use crate::kde::KernelDensity;
use crate::model::ModelRunner;
use crate::particle::Ensemble;

/// A single `(variable, lead-time offset)` bucket's accumulated samples,
/// weighted by particle weight, ready to be turned into a `KernelDensity`.
#[derive(Debug, Default)]
struct Bucket {
    samples: Vec<f64>,
    weights: Vec<f64>,
}

pub struct ForecastConfig {
    pub worker_threads: usize,
    pub horizon_secs: i64,
    pub step_secs: i64,
    pub deadline: Duration,
    /// Output variable names, used to pre-create one bucket per
    /// `(variable, lead-time offset)` before any particle reports in, so a
    /// forecast that times out still reports every expected bucket (empty
    /// ones with NaN stats) rather than silently dropping them.
    pub variables: Vec<String>,
}

/// The lead-time offsets a `run_window` call produces, mirroring its own
/// `while offset <= horizon_secs { ...; offset += step_secs }` stepping.
fn lead_time_offsets(horizon_secs: i64, step_secs: i64) -> Vec<i64> {
    let mut offsets = Vec::new();
    let mut offset = 0;
    while offset <= horizon_secs {
        offsets.push(offset);
        offset += step_secs;
    }
    offsets
}

pub struct ForecastBucket {
    pub variable: String,
    pub offset_secs: i64,
    pub density: KernelDensity,
}

pub struct ForecastResult {
    pub buckets: Vec<ForecastBucket>,
    pub failed_particles: usize,
    pub completed_particles: usize,
}

/// Runs the forecast fan-out. Partial completion (some particles never
/// finish before the deadline) is not an error: the engine returns whatever
/// buckets it could build from completed particles, with `failed_particles`
/// reporting how many never returned.
pub fn run<M: ModelRunner + 'static>(
    model: Arc<M>,
    ensemble: &Ensemble,
    config: ForecastConfig,
) -> Result<ForecastResult, ForecastError> {
    if ensemble.is_empty() {
        return Ok(ForecastResult {
            buckets: Vec::new(),
            failed_particles: 0,
            completed_particles: 0,
        });
    }

    let (work_tx, work_rx) = unbounded::<(usize, crate::vector::StateVector, f64)>();
    for (i, p) in ensemble.particles.iter().enumerate() {
        work_tx.send((i, p.state.clone(), p.weight)).unwrap();
    }
    drop(work_tx);

    let (result_tx, result_rx) = bounded::<Result<(usize, f64, Vec<crate::model::ForecastSample>), usize>>(
        ensemble.len().max(1),
    );

    let n_workers = config.worker_threads.max(1).min(ensemble.len());
    let mut handles = Vec::with_capacity(n_workers);
    for _ in 0..n_workers {
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let model = Arc::clone(&model);
        let horizon = config.horizon_secs;
        let step = config.step_secs;
        handles.push(std::thread::spawn(move || {
            while let Ok((index, state, weight)) = work_rx.recv() {
                let outcome = model
                    .run_window(index, &state, horizon, step)
                    .map(|samples| (index, weight, samples))
                    .map_err(|_| index);
                if result_tx.send(outcome).is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut buckets: BTreeMap<(String, i64), Bucket> = BTreeMap::new();
    for offset in lead_time_offsets(config.horizon_secs, config.step_secs) {
        for variable in &config.variables {
            buckets.insert((variable.clone(), offset), Bucket::default());
        }
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    let deadline = Instant::now() + config.deadline;
    let total = ensemble.len();

    loop {
        if completed + failed >= total {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let timeout = crossbeam_channel::after(remaining);
        select! {
            recv(result_rx) -> msg => match msg {
                Ok(Ok((_, weight, samples))) => {
                    completed += 1;
                    for sample in samples {
                        for (name, value) in sample.output {
                            if let Some(bucket) = buckets.get_mut(&(name, sample.offset_secs)) {
                                bucket.samples.push(value);
                                bucket.weights.push(weight);
                            }
                        }
                    }
                }
                Ok(Err(_)) => {
                    failed += 1;
                }
                Err(_) => break,
            },
            recv(timeout) -> _ => break,
        }
    }

    for h in handles {
        let _ = h.join();
    }

    let pending = total - completed - failed;
    if pending > 0 {
        failed += pending;
    }

    let mut result_buckets = Vec::with_capacity(buckets.len());
    for ((variable, offset_secs), bucket) in buckets {
        let density = KernelDensity::new(bucket.samples, bucket.weights);
        result_buckets.push(ForecastBucket {
            variable,
            offset_secs,
            density,
        });
    }

    Ok(ForecastResult {
        buckets: result_buckets,
        failed_particles: failed,
        completed_particles: completed,
    })
}

/// Nash-Sutcliffe efficiency of a deterministic forecast trace against
/// observations: `1 - sum((obs - sim)^2) / sum((obs - mean(obs))^2)`.
pub fn nash_sutcliffe(observed: &[f64], simulated: &[f64]) -> f64 {
    assert_eq!(observed.len(), simulated.len());
    let mean: f64 = observed.iter().sum::<f64>() / observed.len() as f64;
    let denom: f64 = observed.iter().map(|o| (o - mean).powi(2)).sum();
    if denom <= 0.0 {
        return f64::NAN;
    }
    let numer: f64 = observed
        .iter()
        .zip(simulated)
        .map(|(o, s)| (o - s).powi(2))
        .sum();
    1.0 - numer / denom
}

/// Mean absolute relative error.
pub fn mare(observed: &[f64], simulated: &[f64]) -> f64 {
    assert_eq!(observed.len(), simulated.len());
    let n = observed.len() as f64;
    observed
        .iter()
        .zip(simulated)
        .filter(|(o, _)| o.abs() > f64::EPSILON)
        .map(|(o, s)| ((o - s) / o).abs())
        .sum::<f64>()
        / n
}

//! The model-invocation contract (§4.F): the boundary between the generic
//! filter/forecast core and an external hydrologic simulator.
//!
//! An implementation must be safe to call from multiple threads
//! concurrently, must not retain references to the state it's passed, and
//! must not mutate any shared state across calls — the filter update's
//! "Simulate" step (§4.G step 1) depends on this to run particles across a
//! `rayon` pool without synchronization.

use crate::vector::StateVector;
use crate::error::ModelError;

/// The outcome of a single particle's advance from one assimilation
/// timestamp to the next.
#[derive(Debug, Clone)]
pub struct ModelResult {
    /// The particle's state at the end of the step.
    pub state: StateVector,
    /// Scalar model outputs keyed by name (e.g. "Discharge", "ET").
    pub output: std::collections::BTreeMap<String, f64>,
}

/// One sampled point along a forecast window: a timestamp offset in seconds
/// from the forecast's start, and the scalar outputs at that point.
#[derive(Debug, Clone)]
pub struct ForecastSample {
    pub offset_secs: i64,
    pub output: std::collections::BTreeMap<String, f64>,
}

pub trait ModelRunner: Send + Sync {
    /// Advances a single particle's state by one assimilation step.
    /// `index` identifies the particle within its ensemble only for
    /// diagnostics (scratch-directory naming, error messages); it must not
    /// influence the model's numerical result.
    fn run_model(&self, index: usize, state: &StateVector) -> Result<ModelResult, ModelError>;

    /// Advances a single particle across a forecast window, from `state` at
    /// time zero out to `horizon_secs`, sampling outputs every
    /// `step_secs`. Used exclusively by the forecast engine (§4.I).
    fn run_window(
        &self,
        index: usize,
        state: &StateVector,
        horizon_secs: i64,
        step_secs: i64,
    ) -> Result<Vec<ForecastSample>, ModelError>;
}

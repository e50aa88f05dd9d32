//! An in-process, deterministic `ModelRunner` used by the test suite and by
//! the `mock-demo` CLI subcommand so the pipeline can be exercised without an
//! external simulator binary (Design Notes §9).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ModelError;
use crate::model::{ForecastSample, ModelResult, ModelRunner};
use crate::vector::StateVector;

/// A linear-reservoir toy model: `discharge = state[0] * recession_rate`,
/// with the state decaying geometrically each step. Deterministic given the
/// same input state, so it's suitable for the filter's parallel "Simulate"
/// step.
pub struct MockModelRunner {
    pub recession_rate: f64,
    /// Particle indices that should fail on their next call, for exercising
    /// partial-failure handling in the filter update and forecast engine.
    pub fail_indices: Mutex<std::collections::HashSet<usize>>,
    /// Particle indices that should sleep for `sleep_for` before producing
    /// output, for exercising a forecast deadline against a slow particle.
    pub sleep_indices: Mutex<std::collections::HashSet<usize>>,
    pub sleep_for: Duration,
    pub call_count: AtomicUsize,
}

impl MockModelRunner {
    pub fn new(recession_rate: f64) -> Self {
        MockModelRunner {
            recession_rate,
            fail_indices: Mutex::new(std::collections::HashSet::new()),
            sleep_indices: Mutex::new(std::collections::HashSet::new()),
            sleep_for: Duration::from_secs(0),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn fail_on(recession_rate: f64, indices: impl IntoIterator<Item = usize>) -> Self {
        MockModelRunner {
            recession_rate,
            fail_indices: Mutex::new(indices.into_iter().collect()),
            sleep_indices: Mutex::new(std::collections::HashSet::new()),
            sleep_for: Duration::from_secs(0),
            call_count: AtomicUsize::new(0),
        }
    }

    /// A runner where the given particle indices sleep for `sleep_for`
    /// before producing output, used to simulate a slow particle against a
    /// forecast wall-clock deadline.
    pub fn sleep_on(recession_rate: f64, sleep_for: Duration, indices: impl IntoIterator<Item = usize>) -> Self {
        MockModelRunner {
            recession_rate,
            fail_indices: Mutex::new(std::collections::HashSet::new()),
            sleep_indices: Mutex::new(indices.into_iter().collect()),
            sleep_for,
            call_count: AtomicUsize::new(0),
        }
    }
}

impl ModelRunner for MockModelRunner {
    fn run_model(&self, index: usize, state: &StateVector) -> Result<ModelResult, ModelError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.sleep_indices.lock().unwrap().contains(&index) {
            std::thread::sleep(self.sleep_for);
        }
        if self.fail_indices.lock().unwrap().contains(&index) {
            return Err(ModelError::NonZeroExit { index, status: 1 });
        }
        let next_storage = state[0] * self.recession_rate;
        let discharge = state[0] * (1.0 - self.recession_rate);
        let mut output = BTreeMap::new();
        output.insert("Discharge".to_string(), discharge);
        Ok(ModelResult {
            state: StateVector::new(vec![next_storage]),
            output,
        })
    }

    fn run_window(
        &self,
        index: usize,
        state: &StateVector,
        horizon_secs: i64,
        step_secs: i64,
    ) -> Result<Vec<ForecastSample>, ModelError> {
        if self.sleep_indices.lock().unwrap().contains(&index) {
            std::thread::sleep(self.sleep_for);
        }
        if self.fail_indices.lock().unwrap().contains(&index) {
            return Err(ModelError::NonZeroExit { index, status: 1 });
        }
        let mut storage = state[0];
        let mut samples = Vec::new();
        let mut offset = 0;
        while offset <= horizon_secs {
            let discharge = storage * (1.0 - self.recession_rate);
            let mut output = BTreeMap::new();
            output.insert("Discharge".to_string(), discharge);
            samples.push(ForecastSample {
                offset_secs: offset,
                output,
            });
            storage *= self.recession_rate;
            offset += step_secs;
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discharge_decreases_as_storage_decays() {
        let model = MockModelRunner::new(0.9);
        let state = StateVector::new(vec![100.0]);
        let first = model.run_model(0, &state).unwrap();
        let second = model.run_model(0, &first.state).unwrap();
        assert!(second.output["Discharge"] < first.output["Discharge"]);
    }

    #[test]
    fn designated_failure_index_errors() {
        let model = MockModelRunner::fail_on(0.9, [2]);
        assert!(model.run_model(2, &StateVector::new(vec![1.0])).is_err());
        assert!(model.run_model(0, &StateVector::new(vec![1.0])).is_ok());
    }

    #[test]
    fn run_window_samples_the_full_horizon() {
        let model = MockModelRunner::new(0.9);
        let state = StateVector::new(vec![100.0]);
        let samples = model.run_window(0, &state, 100, 25).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples.last().unwrap().offset_secs, 100);
    }

    #[test]
    fn designated_sleep_index_delays_before_returning() {
        let model = MockModelRunner::sleep_on(0.9, Duration::from_millis(20), [1]);
        let started = std::time::Instant::now();
        model.run_model(1, &StateVector::new(vec![1.0])).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}

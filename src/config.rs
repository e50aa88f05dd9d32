//! Configuration (§6 / SPEC_FULL.md §M): a `serde`+`toml` struct covering
//! every option in the external configuration table, with a thin `clap`
//! overlay for the handful of options worth flipping from the command line.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::FilterConfig;
use crate::kde::multivar::BandwidthMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaConfig {
    pub ensemble_size: usize,
    pub assimilation_step_secs: i64,
    pub do_resample: bool,
    pub do_perturb: bool,
    pub full_class_kernels: bool,
    pub max_da_retries: u32,
    pub observation_variable: String,
    /// Observation error: in absolute mode, the stdev directly; in relative
    /// mode, a fraction multiplied by the observed value (§6 `obsError`).
    pub obs_error: f64,
    /// Selects between `obsError` being absolute or relative (§6
    /// `absoluteError`).
    pub absolute_error: bool,
    pub archive_capacity: usize,
    pub archive_dir: String,
    pub forecast_worker_threads: usize,
    pub forecast_horizon_secs: i64,
    pub forecast_step_secs: i64,
    pub forecast_deadline_secs: u64,
    pub forecast_variables: Vec<String>,
    pub simulator_executable: String,
    pub simulator_scratch_root: String,
    pub simulator_timeout_secs: u64,
}

impl Default for DaConfig {
    fn default() -> Self {
        DaConfig {
            ensemble_size: 100,
            assimilation_step_secs: 3600,
            do_resample: true,
            do_perturb: true,
            full_class_kernels: false,
            max_da_retries: 3,
            observation_variable: "Discharge".to_string(),
            obs_error: 1.0,
            absolute_error: false,
            archive_capacity: 200,
            archive_dir: "./data/archive".to_string(),
            forecast_worker_threads: 4,
            forecast_horizon_secs: 7 * 24 * 3600,
            forecast_step_secs: 3600,
            forecast_deadline_secs: 600,
            forecast_variables: vec![
                "Discharge".to_string(),
                "Evaporation".to_string(),
                "SM1".to_string(),
                "SM2".to_string(),
                "SM3".to_string(),
            ],
            simulator_executable: "./simulator".to_string(),
            simulator_scratch_root: "./data/scratch".to_string(),
            simulator_timeout_secs: 120,
        }
    }
}

impl DaConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            do_resample: self.do_resample,
            do_perturb: self.do_perturb,
            bandwidth_mode: if self.full_class_kernels {
                BandwidthMode::Full
            } else {
                BandwidthMode::Diagonal
            },
        }
    }

    pub fn simulator_timeout(&self) -> Duration {
        Duration::from_secs(self.simulator_timeout_secs)
    }

    pub fn forecast_deadline(&self) -> Duration {
        Duration::from_secs(self.forecast_deadline_secs)
    }
}

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;

use da_core::adapter::SimulatorAdapter;
use da_core::archive::Archive;
use da_core::assimilation::{AssimilationDriver, Observation, ObservationSource};
use da_core::config::DaConfig;
use da_core::forecast::{self, ForecastConfig};
use da_core::particle::{Ensemble, Particle};
use da_core::testing::MockModelRunner;
use da_core::vector::StateVector;

const TIMESTAMP_FORMAT: &str = "%Y%m%d %H-%M";

/// Observation series backed by a two-column `timestamp\tvalue` file, per
/// the observation file format in §6.
struct FileObservations {
    rows: Vec<(NaiveDateTime, Observation)>,
}

impl FileObservations {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading observation file {}", path.display()))?;
        let mut rows = Vec::new();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let ts = match parts.next() {
                Some(t) => t,
                None => continue,
            };
            let value: f64 = match parts.next() {
                Some(v) => v.parse().with_context(|| format!("parsing observation value on line {line:?}"))?,
                None => continue,
            };
            let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
                .with_context(|| format!("parsing observation timestamp {ts:?}"))?;
            rows.push((timestamp, Observation { value }));
        }
        Ok(FileObservations { rows })
    }
}

impl ObservationSource for FileObservations {
    fn observation_at(&self, timestamp: NaiveDateTime) -> Option<Observation> {
        self.rows.iter().find(|(t, _)| *t == timestamp).map(|(_, o)| *o)
    }
}

fn seed_ensemble(size: usize, dim: usize, initial_value: f64) -> Ensemble {
    Ensemble::new(
        (0..size)
            .map(|i| {
                Particle::new(
                    format!("Particle {i}"),
                    StateVector::new(vec![initial_value; dim]),
                    1.0 / size as f64,
                )
            })
            .collect(),
    )
}

fn run_assimilation(config_path: &Path, observations_path: &Path, start: &str, end: &str) -> Result<()> {
    let config_text = std::fs::read_to_string(config_path).unwrap_or_default();
    let config = if config_text.is_empty() {
        DaConfig::default()
    } else {
        DaConfig::from_toml_str(&config_text)?
    };

    let model = SimulatorAdapter::new(
        &config.simulator_executable,
        &config.simulator_scratch_root,
        config.simulator_timeout(),
    );
    let archive = Archive::new(&config.archive_dir, config.archive_capacity);
    let observations = FileObservations::load(observations_path)?;
    let start = NaiveDateTime::parse_from_str(start, TIMESTAMP_FORMAT)?;
    let end = NaiveDateTime::parse_from_str(end, TIMESTAMP_FORMAT)?;

    let driver = AssimilationDriver {
        model: &model,
        observations: &observations,
        archive: &archive,
        config: config.filter_config(),
        step_secs: config.assimilation_step_secs,
        max_retries: config.max_da_retries,
        output_size: config.ensemble_size,
        obs_error: config.obs_error,
        absolute_error: config.absolute_error,
    };

    let mut rng = StdRng::from_os_rng();
    let initial = seed_ensemble(config.ensemble_size, 1, 0.0);
    let reports = driver.run(initial, start, end, Path::new("Streamflow.txt"), &mut rng)?;
    log::info!("assimilation complete: {} steps processed", reports.len());
    Ok(())
}

fn run_forecast(config_path: &Path, from: &str, output_dir: &Path) -> Result<()> {
    let config_text = std::fs::read_to_string(config_path).unwrap_or_default();
    let config = if config_text.is_empty() {
        DaConfig::default()
    } else {
        DaConfig::from_toml_str(&config_text)?
    };

    let model = Arc::new(SimulatorAdapter::new(
        &config.simulator_executable,
        &config.simulator_scratch_root,
        config.simulator_timeout(),
    ));
    let archive = Archive::new(&config.archive_dir, config.archive_capacity);
    let from = NaiveDateTime::parse_from_str(from, TIMESTAMP_FORMAT)?;
    let ensemble = archive.load(from)?;

    let result = forecast::run(
        model,
        &ensemble,
        ForecastConfig {
            worker_threads: config.forecast_worker_threads,
            horizon_secs: config.forecast_horizon_secs,
            step_secs: config.forecast_step_secs,
            deadline: config.forecast_deadline(),
            variables: config.forecast_variables.clone(),
        },
    )?;

    std::fs::create_dir_all(output_dir)?;
    for bucket in &result.buckets {
        let path = output_dir.join(format!("{}+{}s.txt", bucket.variable, bucket.offset_secs));
        std::fs::write(path, format!("bandwidth={}\n", bucket.density.bandwidth()))?;
    }
    log::info!(
        "forecast complete: {} completed, {} failed, {} buckets",
        result.completed_particles,
        result.failed_particles,
        result.buckets.len()
    );
    Ok(())
}

fn run_mock_demo(ensemble_size: usize, steps: usize) -> Result<()> {
    let dir = std::env::temp_dir().join(format!("da-mock-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let archive = Archive::new(dir.join("archive"), 50);
    let model = MockModelRunner::new(0.9);
    let mut rng = StdRng::from_os_rng();

    let mut ensemble = seed_ensemble(ensemble_size, 1, 100.0);
    let t0 = NaiveDateTime::parse_from_str("20260101 00-00", TIMESTAMP_FORMAT).unwrap();
    let mut rows = Vec::new();
    for i in 0..steps {
        let t = t0 + chrono::Duration::hours(i as i64);
        rows.push((t, Observation { value: 80.0 }));
    }
    let observations = FileObservations { rows };

    let driver = AssimilationDriver {
        model: &model,
        observations: &observations,
        archive: &archive,
        config: da_core::filter::FilterConfig::default(),
        step_secs: 3600,
        max_retries: 2,
        output_size: ensemble_size,
        obs_error: 1.0,
        absolute_error: true,
    };
    let t_end = t0 + chrono::Duration::hours(steps as i64 - 1);
    let reports = driver.run(std::mem::take(&mut ensemble), t0, t_end, &dir.join("Streamflow.txt"), &mut rng)?;
    println!("mock-demo: ran {} assimilation steps", reports.len());

    let last = archive.nearest_before(t_end)?.expect("at least one archived state");
    let posterior = archive.load(last)?;
    let forecast_result = forecast::run(
        Arc::new(MockModelRunner::new(0.9)),
        &posterior,
        ForecastConfig {
            worker_threads: 4,
            horizon_secs: 6 * 3600,
            step_secs: 3600,
            deadline: Duration::from_secs(5),
            variables: vec!["Discharge".to_string()],
        },
    )?;
    println!(
        "mock-demo: forecast produced {} buckets ({} particles completed, {} failed)",
        forecast_result.buckets.len(),
        forecast_result.completed_particles,
        forecast_result.failed_particles
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::RunAssimilation {
            config,
            observations,
            start,
            end,
        } => run_assimilation(&config, &observations, &start, &end),
        cli::Commands::RunForecast { config, from, output_dir } => {
            run_forecast(&config, &from, &output_dir)
        }
        cli::Commands::MockDemo { ensemble_size, steps } => run_mock_demo(ensemble_size, steps),
    }
}

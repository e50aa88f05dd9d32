//! State archive (§4.J): disk-backed store of assimilated ensembles, keyed
//! by timestamp, with atomic writes and a capped, uniformly-randomly evicted
//! footprint.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rand::{Rng, RngCore};

use crate::error::ArchiveError;
use crate::particle::{Ensemble, Particle};
use crate::vector::StateVector;

const TIMESTAMP_FORMAT: &str = "%Y%m%d %H-%M";

/// Chooses which archived timestamp to evict once the archive is over
/// capacity. The spec preserves the original engine's uniform-random
/// eviction rather than an LRU/LFU policy — see the Open Questions note in
/// SPEC_FULL.md — but leaves room for a future alternative by making the
/// choice an injectable strategy.
pub trait EvictionPolicy {
    fn choose_victim(&self, candidates: &[NaiveDateTime], rng: &mut dyn rand::RngCore) -> NaiveDateTime;
}

/// The only shipped eviction policy: pick uniformly at random among all
/// archived timestamps. Preserved as specified even though it can evict a
/// timestamp that would be needed again soon.
pub struct UniformRandomEviction;

impl EvictionPolicy for UniformRandomEviction {
    fn choose_victim(&self, candidates: &[NaiveDateTime], rng: &mut dyn rand::RngCore) -> NaiveDateTime {
        let idx = rng.random_range(0..candidates.len());
        candidates[idx]
    }
}

pub struct Archive {
    dir: PathBuf,
    capacity: usize,
    eviction: Box<dyn EvictionPolicy + Send + Sync>,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Archive {
            dir: dir.into(),
            capacity,
            eviction: Box::new(UniformRandomEviction),
        }
    }

    pub fn with_eviction_policy(mut self, policy: Box<dyn EvictionPolicy + Send + Sync>) -> Self {
        self.eviction = policy;
        self
    }

    fn path_for(&self, timestamp: NaiveDateTime) -> PathBuf {
        self.dir.join(format!("{}.txt", timestamp.format(TIMESTAMP_FORMAT)))
    }

    /// Serializes and atomically writes an ensemble for `timestamp`: write
    /// to `<timestamp>.txt.tmp` then rename over the final path, so a crash
    /// mid-write never leaves a half-written archive file visible.
    pub fn store(&self, timestamp: NaiveDateTime, ensemble: &Ensemble, rng: &mut impl RngCore) -> Result<(), ArchiveError> {
        fs::create_dir_all(&self.dir).map_err(|e| ArchiveError::Io {
            path: self.dir.display().to_string(),
            source: e,
        })?;

        let final_path = self.path_for(timestamp);
        let tmp_path = final_path.with_extension("txt.tmp");

        let dim = ensemble.particles.first().map(|p| p.state.dim()).unwrap_or(0);
        let mut body = String::new();
        body.push_str("Id\tWeight");
        for d in 0..dim {
            body.push_str(&format!("\tvar_{}", d + 1));
        }
        body.push('\n');
        for p in &ensemble.particles {
            body.push_str(&format!("{}\t{}", p.id, p.weight));
            for x in p.state.as_slice() {
                body.push_str(&format!("\t{x}"));
            }
            body.push('\n');
        }

        {
            let mut f = fs::File::create(&tmp_path).map_err(|e| ArchiveError::Io {
                path: tmp_path.display().to_string(),
                source: e,
            })?;
            f.write_all(body.as_bytes()).map_err(|e| ArchiveError::Io {
                path: tmp_path.display().to_string(),
                source: e,
            })?;
        }
        fs::rename(&tmp_path, &final_path).map_err(|e| ArchiveError::Io {
            path: final_path.display().to_string(),
            source: e,
        })?;

        self.evict_if_over_capacity(rng)
    }

    fn evict_if_over_capacity(&self, rng: &mut impl RngCore) -> Result<(), ArchiveError> {
        let mut timestamps = self.list_timestamps()?;
        while timestamps.len() > self.capacity {
            let victim = self.eviction.choose_victim(&timestamps, rng);
            let path = self.path_for(victim);
            fs::remove_file(&path).map_err(|e| ArchiveError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            timestamps.retain(|&t| t != victim);
        }
        Ok(())
    }

    /// Lists every archived timestamp, skipping filenames that don't parse
    /// (stray files dropped in the archive directory by hand).
    pub fn list_timestamps(&self) -> Result<Vec<NaiveDateTime>, ArchiveError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| ArchiveError::Io {
            path: self.dir.display().to_string(),
            source: e,
        })? {
            let entry = entry.map_err(|e| ArchiveError::Io {
                path: self.dir.display().to_string(),
                source: e,
            })?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if let Ok(ts) = NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT) {
                    out.push(ts);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn nearest_before(&self, t: NaiveDateTime) -> Result<Option<NaiveDateTime>, ArchiveError> {
        Ok(self.list_timestamps()?.into_iter().filter(|&ts| ts <= t).max())
    }

    pub fn load(&self, timestamp: NaiveDateTime) -> Result<Ensemble, ArchiveError> {
        let path = self.path_for(timestamp);
        let text = fs::read_to_string(&path).map_err(|e| ArchiveError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut lines = text.lines().enumerate();
        lines.next(); // header row: Id\tWeight\tvar_1..var_D

        let mut particles = Vec::new();
        for (lineno, line) in lines {
            let mut fields = line.split('\t');
            let id = fields.next().ok_or_else(|| ArchiveError::Malformed {
                path: path.display().to_string(),
                reason: format!("line {lineno} is missing an id field"),
            })?;
            let weight = fields.next().ok_or_else(|| ArchiveError::Malformed {
                path: path.display().to_string(),
                reason: format!("line {lineno} is missing a weight field"),
            })?;
            let weight: f64 = weight.parse().map_err(|_| ArchiveError::Malformed {
                path: path.display().to_string(),
                reason: format!("line {lineno} has a non-numeric weight"),
            })?;
            let components: Result<Vec<f64>, _> = fields.map(|c| c.parse::<f64>()).collect();
            let components = components.map_err(|_| ArchiveError::Malformed {
                path: path.display().to_string(),
                reason: format!("line {lineno} has a non-numeric state component"),
            })?;
            particles.push(Particle::new(id.to_string(), StateVector::new(components), weight));
        }
        Ok(Ensemble::new(particles))
    }

    /// Synthesizes a state at `target` by forward-forecasting a model from
    /// the nearest prior archived state, for when the exact timestamp isn't
    /// archived (§4.J, state synthesis).
    pub fn synthesize<M: crate::model::ModelRunner>(
        &self,
        model: &M,
        target: NaiveDateTime,
        step_secs: i64,
    ) -> Result<Ensemble, ArchiveError> {
        let prior_ts = self.nearest_before(target)?.ok_or_else(|| ArchiveError::NoPriorState {
            timestamp: target.format(TIMESTAMP_FORMAT).to_string(),
        })?;
        let mut ensemble = self.load(prior_ts)?;
        let mut steps = ((target - prior_ts).num_seconds() / step_secs).max(0);
        while steps > 0 {
            for (i, p) in ensemble.particles.iter_mut().enumerate() {
                if let Ok(result) = model.run_model(i, &p.state) {
                    p.state = result.state;
                }
            }
            steps -= 1;
        }
        Ok(ensemble)
    }
}

/// Root-relative path helper mirroring where the archive lives under a
/// configured data directory, grounded on the directory layout the teacher
/// sets up in `io::ensure_data_directories`.
pub fn default_archive_dir(data_root: impl AsRef<Path>) -> PathBuf {
    data_root.as_ref().join("archive")
}

//! Typed errors for each layer of the engine. Libraries propagate these via
//! `thiserror`; the CLI binary collects them into `anyhow::Result` at its
//! boundary.

use thiserror::Error;

/// Errors from a single model invocation (§4.F/§4.K).
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model run for particle {index} timed out after {timeout_secs}s")]
    Timeout { index: usize, timeout_secs: u64 },
    #[error("model run for particle {index} exited with status {status}")]
    NonZeroExit { index: usize, status: i32 },
    #[error("failed to parse model output for particle {index}: {reason}")]
    OutputParse { index: usize, reason: String },
    #[error("scratch directory setup failed for particle {index}: {source}")]
    ScratchDir {
        index: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn model process for particle {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from weighted statistics and single-parameter distributions
/// (§4.B/§4.E) — invalid input that can't be recovered from numerically:
/// weights that are all zero or non-finite, or (by the same convention) a
/// non-positive observation stdev.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("invalid weights: all weights are zero or non-finite")]
    InvalidWeights,
}

/// Errors from the particle-filter update step (§4.G).
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("ensemble is empty, cannot update")]
    EmptyEnsemble,
    #[error("kernel density error during perturbation: {0}")]
    Kde(#[from] KdeError),
    #[error("invalid weights: {0}")]
    InvalidWeights(#[from] StatsError),
}

/// Errors from kernel-density estimation (§4.C/§4.D).
#[derive(Debug, Error)]
pub enum KdeError {
    #[error("kernel density requires matching sample/weight counts")]
    EmptySample,
    #[error("kernel density has no samples to evaluate")]
    EmptyKDE,
    #[error("sample dimension mismatch: {0}")]
    Dimension(#[from] crate::vector::DimensionMismatch),
    #[error("covariance matrix is not positive definite (Cholesky failed)")]
    NotPositiveDefinite,
}

/// Errors from the assimilation driver (§4.H).
#[derive(Debug, Error)]
pub enum DaError {
    #[error("no observation available at or after {timestamp}")]
    MissingObservation { timestamp: String },
    #[error("observation is zero in relative-error mode at {timestamp}")]
    ZeroObservationInRelativeMode { timestamp: String },
    #[error("filter update failed: {0}")]
    Filter(#[from] FilterError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("invalid observation distribution: {0}")]
    Stats(#[from] StatsError),
}

/// Errors from the state archive (§4.J).
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error on archive file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed archive record at {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("no prior state found before {timestamp} to synthesize from")]
    NoPriorState { timestamp: String },
}

/// Errors from the forecast engine (§4.I).
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("forecast wall-clock budget of {budget_secs}s exhausted with {pending} particles still pending")]
    DeadlineExhausted { budget_secs: u64, pending: usize },
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

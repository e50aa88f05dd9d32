//! Univariate weighted Gaussian kernel density estimate.
//!
//! Used to turn a weighted ensemble of scalar forecast outputs (discharge at
//! a lead time, a single soil-moisture layer, ...) into a continuous
//! distribution: `pdf`, `cdf`, and the CRPS against an observation.
//!
//! A KDE over zero samples is a valid, constructible value (§4.C): the
//! forecast engine pre-creates one bucket per `(variable, timestamp)` before
//! any particle reports in, and some of those buckets may never receive a
//! sample if the deadline is exhausted first. `mean`/`st_dev` report `NaN`
//! for such a KDE; `pdf`/`cdf`/`crps` raise `EmptyKDE` since there is no
//! distribution to evaluate.

pub mod multivar;

use crate::error::KdeError;
use crate::stats::effective_sample_size;

const SQRT_2: f64 = std::f64::consts::SQRT_2;
const SQRT_2PI: f64 = 2.5066282746310002;

fn std_normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + libm_erf(z / SQRT_2))
}

/// Minimal error-function implementation (Abramowitz & Stegun 7.1.26),
/// accurate to ~1.5e-7 — plenty for CRPS/CDF use, and avoids pulling in a
/// special-functions crate for one call site.
fn libm_erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

/// A weighted Gaussian KDE over a 1-D sample.
#[derive(Debug, Clone)]
pub struct KernelDensity {
    samples: Vec<f64>,
    weights: Vec<f64>,
    weight_sum: f64,
    bandwidth: f64,
}

impl KernelDensity {
    /// Builds a KDE from weighted samples, choosing the bandwidth via
    /// Silverman's rule: `h = 0.9 * min(sigma, IQR/1.34) * n_eff^(-1/5)`,
    /// falling back to `0.9 * sigma * n_eff^(-1/5)` when an IQR cannot be
    /// estimated (fewer than two distinct values). An empty sample set is
    /// constructible (§4.C); its bandwidth is `NaN` until evaluated.
    pub fn new(samples: Vec<f64>, weights: Vec<f64>) -> Self {
        assert_eq!(samples.len(), weights.len(), "samples and weights must have equal length");
        if samples.is_empty() {
            return KernelDensity {
                samples,
                weights,
                weight_sum: 0.0,
                bandwidth: f64::NAN,
            };
        }
        let weight_sum: f64 = weights.iter().sum();
        let n_eff = effective_sample_size(&weights).max(1.0);
        let sigma = crate::stats::weighted_stdev(&samples, &weights).max(1e-12);
        let iqr = weighted_iqr(&samples, &weights);
        let spread = match iqr {
            Some(iqr) if iqr > 0.0 => sigma.min(iqr / 1.34),
            _ => sigma,
        };
        let bandwidth = (0.9 * spread * n_eff.powf(-0.2)).max(1e-9);
        KernelDensity {
            samples,
            weights,
            weight_sum,
            bandwidth,
        }
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Weighted mean of the underlying sample, or `NaN` if there are no
    /// samples.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            f64::NAN
        } else {
            crate::stats::weighted_mean(&self.samples, &self.weights)
        }
    }

    /// Weighted standard deviation of the underlying sample, or `NaN` if
    /// there are no samples.
    pub fn st_dev(&self) -> f64 {
        if self.samples.is_empty() {
            f64::NAN
        } else {
            crate::stats::weighted_stdev(&self.samples, &self.weights)
        }
    }

    /// Probability density at `x`.
    pub fn pdf(&self, x: f64) -> Result<f64, KdeError> {
        if self.samples.is_empty() {
            return Err(KdeError::EmptyKDE);
        }
        let h = self.bandwidth;
        let mut acc = 0.0;
        for (&s, &w) in self.samples.iter().zip(&self.weights) {
            let z = (x - s) / h;
            acc += w * (-0.5 * z * z).exp() / (h * SQRT_2PI);
        }
        Ok(acc / self.weight_sum)
    }

    /// Cumulative distribution at `x`, computed as the weighted sum of each
    /// kernel's closed-form normal CDF rather than by integrating `pdf`.
    pub fn cdf(&self, x: f64) -> Result<f64, KdeError> {
        if self.samples.is_empty() {
            return Err(KdeError::EmptyKDE);
        }
        let h = self.bandwidth;
        let mut acc = 0.0;
        for (&s, &w) in self.samples.iter().zip(&self.weights) {
            acc += w * std_normal_cdf((x - s) / h);
        }
        Ok(acc / self.weight_sum)
    }

    /// Continuous Ranked Probability Score of this distribution against a
    /// scalar observation, via the standard empirical decomposition over
    /// the (weighted) sample set.
    pub fn crps(&self, observation: f64) -> Result<f64, KdeError> {
        if self.samples.is_empty() {
            return Err(KdeError::EmptyKDE);
        }
        let n = self.samples.len();
        let term1: f64 = self
            .samples
            .iter()
            .zip(&self.weights)
            .map(|(&s, &w)| w * (s - observation).abs())
            .sum::<f64>()
            / self.weight_sum;

        let mut term2 = 0.0;
        for i in 0..n {
            for j in 0..n {
                term2 += self.weights[i] * self.weights[j] * (self.samples[i] - self.samples[j]).abs();
            }
        }
        term2 /= 2.0 * self.weight_sum * self.weight_sum;

        Ok(term1 - term2)
    }
}

fn weighted_iqr(samples: &[f64], weights: &[f64]) -> Option<f64> {
    let mut pairs: Vec<(f64, f64)> = samples.iter().copied().zip(weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    let total: f64 = weights.iter().sum();
    let quantile = |q: f64| -> f64 {
        let target = q * total;
        let mut running = 0.0;
        for &(v, w) in &pairs {
            running += w;
            if running >= target {
                return v;
            }
        }
        pairs.last().unwrap().0
    };
    let q1 = quantile(0.25);
    let q3 = quantile(0.75);
    if (q3 - q1).abs() < f64::EPSILON {
        None
    } else {
        Some(q3 - q1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_integrates_to_roughly_one() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let weights = vec![1.0; 5];
        let kde = KernelDensity::new(samples, weights);
        let mut total = 0.0;
        let mut x = -10.0;
        while x < 20.0 {
            total += kde.pdf(x).unwrap() * 0.01;
            x += 0.01;
        }
        assert!((total - 1.0).abs() < 0.02);
    }

    #[test]
    fn cdf_is_nondecreasing() {
        let samples = vec![0.0, 1.0, 2.0];
        let weights = vec![1.0, 1.0, 1.0];
        let kde = KernelDensity::new(samples, weights);
        let mut prev = 0.0;
        let mut x = -5.0;
        while x < 5.0 {
            let c = kde.cdf(x).unwrap();
            assert!(c + 1e-9 >= prev);
            prev = c;
            x += 0.1;
        }
    }

    #[test]
    fn cdf_approaches_zero_and_one_at_the_tails() {
        let samples = vec![0.0, 1.0, 2.0];
        let weights = vec![1.0, 1.0, 1.0];
        let kde = KernelDensity::new(samples, weights);
        assert!(kde.cdf(-1000.0).unwrap() < 1e-6);
        assert!(kde.cdf(1000.0).unwrap() > 1.0 - 1e-6);
    }

    #[test]
    fn crps_is_zero_width_when_observation_matches_a_degenerate_ensemble() {
        let samples = vec![5.0, 5.0, 5.0];
        let weights = vec![1.0, 1.0, 1.0];
        let kde = KernelDensity::new(samples, weights);
        assert!(kde.crps(5.0).unwrap() >= 0.0);
        assert!(kde.crps(5.0).unwrap() < kde.crps(50.0).unwrap());
    }

    #[test]
    fn empty_kde_is_constructible_with_nan_stats() {
        let kde = KernelDensity::new(vec![], vec![]);
        assert!(kde.mean().is_nan());
        assert!(kde.st_dev().is_nan());
    }

    #[test]
    fn empty_kde_rejects_evaluation() {
        let kde = KernelDensity::new(vec![], vec![]);
        assert!(matches!(kde.pdf(0.0), Err(KdeError::EmptyKDE)));
        assert!(matches!(kde.cdf(0.0), Err(KdeError::EmptyKDE)));
        assert!(matches!(kde.crps(0.0), Err(KdeError::EmptyKDE)));
    }
}

//! Weighted sample statistics shared by the filter update and the forecast
//! engine: weighted mean/stdev and weighted resampling with replacement.

use rand::Rng;

use crate::error::StatsError;

/// Weighted arithmetic mean of `values` under `weights`. Panics if the
/// slices differ in length or the weight sum is non-positive.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    assert_eq!(values.len(), weights.len());
    let weight_sum: f64 = weights.iter().sum();
    assert!(weight_sum > 0.0, "weights must sum to a positive value");
    values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / weight_sum
}

/// Weighted (population) standard deviation of `values` under `weights`,
/// using the bias-corrected weighted variance estimator
/// `sum(w) / (sum(w)^2 - sum(w^2)) * sum(w * (v - mean)^2)`.
/// Falls back to 0 when fewer than two effective samples are present.
pub fn weighted_stdev(values: &[f64], weights: &[f64]) -> f64 {
    assert_eq!(values.len(), weights.len());
    let mean = weighted_mean(values, weights);
    let w_sum: f64 = weights.iter().sum();
    let w_sq_sum: f64 = weights.iter().map(|w| w * w).sum();
    let denom = w_sum * w_sum - w_sq_sum;
    if denom <= 0.0 {
        return 0.0;
    }
    let numer: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum();
    (w_sum / denom * numer).max(0.0).sqrt()
}

/// Effective sample size `(sum w)^2 / sum w^2`, used by the KDE bandwidth
/// rule.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let w_sum: f64 = weights.iter().sum();
    let w_sq_sum: f64 = weights.iter().map(|w| w * w).sum();
    if w_sq_sum <= 0.0 {
        0.0
    } else {
        w_sum * w_sum / w_sq_sum
    }
}

/// Draws `n` indices into `weights` with replacement, probability
/// proportional to weight, via inverse-CDF search over the cumulative
/// weight array. Ties in cumulative mass resolve to the first matching
/// index (`partition_point`, not `binary_search`, to keep that determinism).
///
/// Fails with `InvalidWeights` when the weights sum to a non-positive or
/// non-finite value (§4.B).
pub fn weighted_resample_indices<R: rand::RngCore + ?Sized>(
    weights: &[f64],
    n: usize,
    rng: &mut R,
) -> Result<Vec<usize>, StatsError> {
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(StatsError::InvalidWeights);
    }
    let mut cumulative = Vec::with_capacity(weights.len());
    let mut running = 0.0;
    for &w in weights {
        running += w;
        cumulative.push(running);
    }
    Ok((0..n)
        .map(|_| {
            let draw = rng.random::<f64>() * total;
            let idx = cumulative.partition_point(|&c| c < draw);
            idx.min(weights.len() - 1)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn weighted_mean_with_equal_weights_is_plain_mean() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let weights = [1.0, 1.0, 1.0, 1.0];
        assert!((weighted_mean(&values, &weights) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn weighted_mean_skews_toward_heavy_weight() {
        let values = [0.0, 10.0];
        let weights = [9.0, 1.0];
        assert!((weighted_mean(&values, &weights) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn stdev_of_constant_series_is_zero() {
        let values = [5.0, 5.0, 5.0];
        let weights = [1.0, 1.0, 1.0];
        assert_eq!(weighted_stdev(&values, &weights), 0.0);
    }

    #[test]
    fn effective_sample_size_of_uniform_weights_is_n() {
        let weights = [0.25, 0.25, 0.25, 0.25];
        assert!((effective_sample_size(&weights) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn effective_sample_size_collapses_for_degenerate_weights() {
        let mut weights = vec![0.0; 100];
        weights[0] = 1.0;
        assert!((effective_sample_size(&weights) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn resample_only_ever_picks_the_single_nonzero_weight() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = [0.0, 1.0, 0.0];
        let picks = weighted_resample_indices(&weights, 50, &mut rng).unwrap();
        assert!(picks.iter().all(|&i| i == 1));
    }

    #[test]
    fn resample_is_deterministic_given_a_fixed_seed() {
        let weights = [1.0, 2.0, 3.0, 4.0];
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = weighted_resample_indices(&weights, 20, &mut rng_a).unwrap();
        let b = weighted_resample_indices(&weights, 20, &mut rng_b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn all_zero_weights_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let weights = [0.0, 0.0, 0.0];
        assert!(matches!(
            weighted_resample_indices(&weights, 5, &mut rng),
            Err(StatsError::InvalidWeights)
        ));
    }
}

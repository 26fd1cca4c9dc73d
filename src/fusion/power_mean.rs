//! Weighted power mean
//!
//! `M_p = ((Σ wᵢ·sᵢᵖ) / Σ wᵢ)^(1/p)`: p = 1 is the weighted average,
//! p = 0 the weighted geometric mean, p → ∞ the max and p → −∞ the min.

use crate::fusion::calibration::clamp01;

/// Weighted power mean of scores in [0, 1].
///
/// Scores are clamped, pairs with a non-finite or non-positive weight are
/// skipped, and the result is clamped to [0, 1]. No valid pair gives 0.
pub fn weighted_power_mean(scores: &[f64], weights: &[f64], p: f64) -> f64 {
    let pairs: Vec<(f64, f64)> = scores
        .iter()
        .zip(weights.iter())
        .filter(|(_, w)| w.is_finite() && **w > 0.0)
        .map(|(s, w)| (clamp01(*s), *w))
        .collect();

    if pairs.is_empty() {
        return 0.0;
    }

    if p.is_nan() {
        return weighted_power_mean(scores, weights, 1.0);
    }
    if p == f64::INFINITY {
        return pairs.iter().map(|(s, _)| *s).fold(0.0, f64::max);
    }
    if p == f64::NEG_INFINITY {
        return pairs.iter().map(|(s, _)| *s).fold(1.0, f64::min);
    }

    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();

    if p == 0.0 {
        if pairs.iter().any(|(s, _)| *s == 0.0) {
            return 0.0;
        }
        let log_mean = pairs.iter().map(|(s, w)| w * s.ln()).sum::<f64>() / total_weight;
        return clamp01(log_mean.exp());
    }

    if p < 0.0 && pairs.iter().any(|(s, _)| *s == 0.0) {
        return 0.0;
    }

    // Scale by the dominant score so large |p| neither overflows nor underflows
    let pivot = if p > 0.0 {
        pairs.iter().map(|(s, _)| *s).fold(0.0, f64::max)
    } else {
        pairs.iter().map(|(s, _)| *s).fold(1.0, f64::min)
    };
    if pivot == 0.0 {
        return 0.0;
    }

    let mean = pairs.iter().map(|(s, w)| w * (s / pivot).powf(p)).sum::<f64>() / total_weight;
    clamp01(pivot * mean.powf(1.0 / p))
}

/// Unweighted convenience wrapper
pub fn power_mean(scores: &[f64], p: f64) -> f64 {
    let weights = vec![1.0; scores.len()];
    weighted_power_mean(scores, &weights, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_one_is_weighted_average() {
        let m = weighted_power_mean(&[0.2, 0.8], &[1.0, 3.0], 1.0);
        assert!((m - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_extremes() {
        let scores = [0.1, 0.9, 0.5];
        assert_eq!(power_mean(&scores, f64::INFINITY), 0.9);
        assert_eq!(power_mean(&scores, f64::NEG_INFINITY), 0.1);
        let high = power_mean(&scores, 50.0);
        let low = power_mean(&scores, -50.0);
        assert!(high > 0.85 && high <= 0.9);
        assert!(low < 0.15 && low >= 0.1);
    }

    #[test]
    fn test_large_finite_p_approaches_extremes() {
        let scores = [0.9, 0.1];
        let weights = [1.0, 1.0];
        let high = weighted_power_mean(&scores, &weights, 1e4);
        let low = weighted_power_mean(&scores, &weights, -1e4);
        assert!((high - 0.9).abs() < 1e-3, "got {}", high);
        assert!((low - 0.1).abs() < 1e-3, "got {}", low);
        assert_eq!(power_mean(&[0.0, 0.0], 1e6), 0.0);
    }

    #[test]
    fn test_geometric_mean() {
        let m = power_mean(&[0.25, 1.0], 0.0);
        assert!((m - 0.5).abs() < 1e-12);
        assert_eq!(power_mean(&[0.0, 1.0], 0.0), 0.0);
    }

    #[test]
    fn test_negative_p_with_zero() {
        assert_eq!(power_mean(&[0.0, 0.7], -1.0), 0.0);
    }

    #[test]
    fn test_invalid_weights_skipped() {
        let m = weighted_power_mean(&[0.4, 0.9], &[1.0, f64::NAN], 1.0);
        assert!((m - 0.4).abs() < 1e-12);
        assert_eq!(weighted_power_mean(&[0.4], &[0.0], 1.0), 0.0);
        assert_eq!(weighted_power_mean(&[], &[], 2.0), 0.0);
    }

    #[test]
    fn test_out_of_range_scores_clamped() {
        let m = power_mean(&[7.0, -3.0], 1.0);
        assert!((m - 0.5).abs() < 1e-12);
    }
}

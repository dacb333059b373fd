//! Deterministic feature extraction from a cabin's pressure series.
//!
//! `compute_features` is a pure function: given the same `(pressures,
//! cavity_id)` it always returns the same [`FeatureVector`]. Rounding is
//! applied once, after computation, to the stored representation; the
//! rounded values are what both persistence and inference see, so the two
//! are guaranteed bit-identical.

use ldpj_common::FeatureMode;
use serde::{Deserialize, Serialize};

/// Fixed 7-scalar summary of one cycle's pressure series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Maximum pressure observed.
    pub max: f64,
    /// Minimum pressure observed.
    pub min: f64,
    /// `max - min`.
    pub difference: f64,
    /// Arithmetic mean.
    pub average: f64,
    /// Population variance (divide by N, not N-1).
    pub variance: f64,
    /// Slope of a degree-1 least-squares fit over `x = 0..N-1`.
    pub trend_slope: f64,
    /// Cabin/cavity index, as a float.
    pub cavity_id: f64,
}

/// Compute the feature vector for one completed cycle's pressure series.
///
/// For `pressures.len() < 2`, every numeric field except `cavity_id` is
/// zero -- there isn't enough data for a meaningful summary.
#[must_use]
pub fn compute_features(pressures: &[f64], cavity_id: i64) -> FeatureVector {
    if pressures.len() < 2 {
        return FeatureVector {
            max: 0.0,
            min: 0.0,
            difference: 0.0,
            average: 0.0,
            variance: 0.0,
            trend_slope: 0.0,
            cavity_id: cavity_id as f64,
        };
    }

    let n = pressures.len() as f64;
    let max = pressures.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = pressures.iter().copied().fold(f64::INFINITY, f64::min);
    let average = pressures.iter().sum::<f64>() / n;
    let variance = pressures.iter().map(|p| (p - average).powi(2)).sum::<f64>() / n;
    let trend_slope = least_squares_slope(pressures).unwrap_or(0.0);

    FeatureVector {
        max: round_to(max, 3),
        min: round_to(min, 3),
        difference: round_to(max - min, 3),
        average: round_to(average, 3),
        variance: round_to(variance, 3),
        trend_slope: round_to(trend_slope, 6),
        cavity_id: cavity_id as f64,
    }
}

/// Slope coefficient of `y = a + b*x` fit by ordinary least squares, with
/// `x = [0, 1, ..., n-1]`. Returns `None` if the denominator is degenerate
/// (constant `x`, which cannot happen for `n >= 2`, or a non-finite
/// result), in which case the caller substitutes a slope of zero.
fn least_squares_slope(ys: &[f64]) -> Option<f64> {
    let n = ys.len() as f64;
    let sum_x: f64 = (0..ys.len()).map(|i| i as f64).sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = ys.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..ys.len()).map(|i| (i * i) as f64).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom == 0.0 {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    slope.is_finite().then_some(slope)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Project a [`FeatureVector`] into the ordered sequence consumed by
/// inference and persistence.
///
/// 7-dim order: `[max, min, difference, average, variance, trend_slope,
/// cavity_id]`. 6-dim omits `cavity_id`.
#[must_use]
pub fn features_to_vector(feats: &FeatureVector, mode: FeatureMode) -> Vec<f64> {
    let mut v = vec![
        feats.max,
        feats.min,
        feats.difference,
        feats.average,
        feats.variance,
        feats.trend_slope,
    ];
    if mode == FeatureMode::SevenDim {
        v.push(feats.cavity_id);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_basic_scenario() {
        let feats = compute_features(&[100.0, 200.0, 300.0, 400.0, 500.0], 2);
        assert_eq!(feats.max, 500.0);
        assert_eq!(feats.min, 100.0);
        assert_eq!(feats.difference, 400.0);
        assert_eq!(feats.average, 300.0);
        assert_eq!(feats.variance, 20000.0);
        assert_eq!(feats.trend_slope, 100.0);
        assert_eq!(feats.cavity_id, 2.0);
    }

    #[test]
    fn test_feature_short_input_is_all_zero() {
        let feats = compute_features(&[42.0], 1);
        assert_eq!(feats.max, 0.0);
        assert_eq!(feats.min, 0.0);
        assert_eq!(feats.difference, 0.0);
        assert_eq!(feats.average, 0.0);
        assert_eq!(feats.variance, 0.0);
        assert_eq!(feats.trend_slope, 0.0);
        assert_eq!(feats.cavity_id, 1.0);
    }

    #[test]
    fn test_feature_extraction_is_pure() {
        let a = compute_features(&[10.0, 20.0, 5.0, 30.0], 7);
        let b = compute_features(&[10.0, 20.0, 5.0, 30.0], 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_features_to_vector_orders_and_projects() {
        let feats = compute_features(&[100.0, 200.0, 300.0, 400.0, 500.0], 2);
        let seven = features_to_vector(&feats, FeatureMode::SevenDim);
        let six = features_to_vector(&feats, FeatureMode::SixDim);
        assert_eq!(seven.len(), 7);
        assert_eq!(six.len(), 6);
        assert_eq!(seven[..6], six[..]);
        assert_eq!(seven[6], 2.0);
    }

    #[test]
    fn test_flat_series_has_zero_slope_and_variance() {
        let feats = compute_features(&[50.0, 50.0, 50.0], 0);
        assert_eq!(feats.trend_slope, 0.0);
        assert_eq!(feats.variance, 0.0);
    }
}

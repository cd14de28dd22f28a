use serde::Serialize;

use crate::detector::accumulator::WindowStats;

/// Outcome of the size-outlier test for one trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub z_score: f64,
    pub is_flagged: bool,
}

/// Classify a trade size against an account baseline.
///
/// `z = (size - mean) / std_dev` when `std_dev > 0`, flagged when `|z| > threshold`.
/// A zero (or undefined) deviation yields `z = 0` and never flags: an account
/// that always trades the same size cannot be an outlier by this rule.
pub fn classify(trade_size: f64, mean: f64, std_dev: f64, threshold: f64) -> Classification {
    if !std_dev.is_finite() || std_dev <= 0.0 {
        return Classification { z_score: 0.0, is_flagged: false };
    }

    let z_score = (trade_size - mean) / std_dev;
    Classification {
        z_score,
        is_flagged: z_score.abs() > threshold,
    }
}

/// Same as [`classify`], reading the baseline from a window.
pub fn classify_against(trade_size: f64, baseline: &WindowStats, threshold: f64) -> Classification {
    classify(trade_size, baseline.mean, baseline.std_dev, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_std_never_flags() {
        for size in [0.0, 1.0, 500.0, 50_000.0, 1e12, -1e12] {
            let c = classify(size, 500.0, 0.0, 3.0);
            assert_eq!(c.z_score, 0.0);
            assert!(!c.is_flagged, "size {size} flagged with zero std");
        }
    }

    #[test]
    fn z_score_is_the_exact_formula() {
        let (mean, std) = (812.25, 37.5);
        for size in [0.0, 12.5, 812.25, 999.999, 12_345.678] {
            let c = classify(size, mean, std, 3.0);
            assert_eq!(c.z_score, (size - mean) / std);
        }
    }

    #[test]
    fn threshold_is_strict() {
        // z = exactly 3.0 is not an outlier.
        let c = classify(130.0, 100.0, 10.0, 3.0);
        assert_eq!(c.z_score, 3.0);
        assert!(!c.is_flagged);

        let c = classify(130.5, 100.0, 10.0, 3.0);
        assert!(c.is_flagged);
    }

    #[test]
    fn unusually_small_trades_flag_too() {
        let c = classify(10.0, 1000.0, 100.0, 3.0);
        assert!(c.z_score < -3.0);
        assert!(c.is_flagged);
    }

    #[test]
    fn nan_std_is_treated_as_missing() {
        let c = classify(10.0, 1.0, f64::NAN, 3.0);
        assert_eq!(c, Classification { z_score: 0.0, is_flagged: false });
    }

    #[test]
    fn insufficient_window_never_flags() {
        let baseline = WindowStats::from_sizes(&[100.0]);
        let c = classify_against(1_000_000.0, &baseline, 3.0);
        assert!(!c.is_flagged);
    }
}

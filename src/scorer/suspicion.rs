use serde::Serialize;

use crate::error::{AppError, Result};

pub const SCORE_MAX: f64 = 100.0;

/// Inputs to the market suspicion formula, recomputed from stored trades each
/// aggregation cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketStats {
    pub total_trades: u64,
    pub flagged_trades: u64,
    pub unique_accounts: u64,
    pub total_volume: f64,
    /// Percent change of the implied Yes probability over the last 24h.
    pub price_change_24h: f64,
    /// High minus low of the implied Yes probability over the last 24h.
    pub price_range_24h: f64,
}

impl MarketStats {
    pub fn flagged_ratio(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            (self.flagged_trades as f64 / self.total_trades as f64).min(1.0)
        }
    }
}

/// Weights and saturation points for the volatility and suspicion scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SuspicionPolicy {
    /// Weight of the flagged-trade percentage in the suspicion score.
    pub flagged_weight: f64,
    /// Weight of the volatility score in the suspicion score.
    pub volatility_weight: f64,
    /// Relative weight of the 24h price change inside volatility.
    pub change_weight: f64,
    /// Relative weight of the 24h price range inside volatility.
    pub range_weight: f64,
    /// |change| (percent) at which the change term saturates.
    pub change_saturation_pct: f64,
    /// Price range (probability units) at which the range term saturates.
    pub range_saturation: f64,
}

impl Default for SuspicionPolicy {
    fn default() -> Self {
        Self {
            flagged_weight: 0.7,
            volatility_weight: 0.3,
            change_weight: 0.6,
            range_weight: 0.4,
            change_saturation_pct: 50.0,
            range_saturation: 0.5,
        }
    }
}

impl SuspicionPolicy {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("SUSPICION_FLAGGED_WEIGHT", self.flagged_weight),
            ("SUSPICION_VOLATILITY_WEIGHT", self.volatility_weight),
            ("change_weight", self.change_weight),
            ("range_weight", self.range_weight),
        ];
        for (name, w) in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(AppError::Config(format!("{name} must be a non-negative number")));
            }
        }
        if self.change_weight + self.range_weight <= 0.0 {
            return Err(AppError::Config("volatility weights must not both be zero".to_string()));
        }
        if !(self.change_saturation_pct > 0.0 && self.range_saturation > 0.0) {
            return Err(AppError::Config("volatility saturation points must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketScores {
    pub volatility_score: f64,
    pub suspicion_score: f64,
}

impl MarketScores {
    pub const ZERO: MarketScores = MarketScores { volatility_score: 0.0, suspicion_score: 0.0 };
}

/// Volatility and suspicion for one market, both in `[0, 100]`.
///
/// Volatility is non-decreasing in `|price_change_24h|` and in the 24h range.
/// A market without trades scores zero on both.
pub fn aggregate(stats: &MarketStats, policy: &SuspicionPolicy) -> MarketScores {
    if stats.total_trades == 0 {
        return MarketScores::ZERO;
    }

    let change_term = saturate(stats.price_change_24h.abs(), policy.change_saturation_pct);
    let range_term = saturate(stats.price_range_24h.abs(), policy.range_saturation);
    let weight_sum = policy.change_weight + policy.range_weight;
    let volatility = if weight_sum > 0.0 {
        (policy.change_weight * change_term + policy.range_weight * range_term) / weight_sum * SCORE_MAX
    } else {
        0.0
    };
    let volatility_score = bounded(volatility);

    let suspicion = policy.flagged_weight * stats.flagged_ratio() * SCORE_MAX
        + policy.volatility_weight * volatility_score;

    MarketScores {
        volatility_score,
        suspicion_score: bounded(suspicion),
    }
}

/// Map a trade's price onto the probability of the market's Yes side.
/// Outcomes that are not a Yes/No (or Up/Down) label yield `None`.
pub fn implied_yes_probability(price: f64, outcome: Option<&str>) -> Option<f64> {
    if !(0.0..=1.0).contains(&price) {
        return None;
    }
    match outcome.map(|o| o.trim().to_ascii_lowercase()).as_deref() {
        Some("yes") | Some("up") => Some(price),
        Some("no") | Some("down") => Some(1.0 - price),
        _ => None,
    }
}

/// `(percent change first → last, high − low)` of a time-ordered series.
pub fn price_movement(series: &[f64]) -> (f64, f64) {
    if series.len() < 2 {
        return (0.0, 0.0);
    }
    let first = series[0];
    let last = series[series.len() - 1];
    let change = if first > 0.0 { (last - first) / first * 100.0 } else { 0.0 };

    let (lo, hi) = series
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    (change, hi - lo)
}

fn saturate(value: f64, at: f64) -> f64 {
    if value.is_nan() || at <= 0.0 {
        return 0.0;
    }
    (value / at).min(1.0)
}

fn bounded(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, SCORE_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, flagged: u64, change: f64, range: f64) -> MarketStats {
        MarketStats {
            total_trades: total,
            flagged_trades: flagged,
            unique_accounts: total.min(5),
            total_volume: total as f64 * 1000.0,
            price_change_24h: change,
            price_range_24h: range,
        }
    }

    #[test]
    fn market_without_trades_scores_zero() {
        let s = aggregate(&MarketStats::default(), &SuspicionPolicy::default());
        assert_eq!(s, MarketScores::ZERO);
        // Even with price movement recorded, no trades means nothing to score.
        let s = aggregate(&stats(0, 0, 80.0, 0.4), &SuspicionPolicy::default());
        assert_eq!(s, MarketScores::ZERO);
    }

    #[test]
    fn volatility_is_monotone_in_change_magnitude() {
        let policy = SuspicionPolicy::default();
        let mut prev = -1.0;
        for step in 0..=120 {
            let change = step as f64;
            let up = aggregate(&stats(10, 1, change, 0.05), &policy).volatility_score;
            let down = aggregate(&stats(10, 1, -change, 0.05), &policy).volatility_score;
            assert_eq!(up, down, "sign of change must not matter");
            assert!(up >= prev, "volatility dropped at change={change}");
            prev = up;
        }
    }

    #[test]
    fn scores_stay_in_range() {
        let policy = SuspicionPolicy {
            flagged_weight: 5.0,
            volatility_weight: 5.0,
            ..SuspicionPolicy::default()
        };
        let s = aggregate(&stats(10, 10, 1e9, 1.0), &policy);
        assert_eq!(s.volatility_score, 100.0);
        assert_eq!(s.suspicion_score, 100.0);
        let s = aggregate(&stats(10, 0, f64::NAN, 0.0), &policy);
        assert_eq!(s.volatility_score, 0.0);
        assert_eq!(s.suspicion_score, 0.0);
    }

    #[test]
    fn suspicion_combines_flag_ratio_and_volatility() {
        let policy = SuspicionPolicy::default();
        // Half the trades flagged, no movement: 0.7 * 50.
        let s = aggregate(&stats(10, 5, 0.0, 0.0), &policy);
        assert!((s.suspicion_score - 35.0).abs() < 1e-9);
        // Saturated movement adds 0.3 * 100.
        let s = aggregate(&stats(10, 5, 50.0, 0.5), &policy);
        assert!((s.volatility_score - 100.0).abs() < 1e-9);
        assert!((s.suspicion_score - 65.0).abs() < 1e-9);
    }

    #[test]
    fn implied_probability_maps_sides() {
        assert_eq!(implied_yes_probability(0.3, Some("Yes")), Some(0.3));
        assert_eq!(implied_yes_probability(0.25, Some("NO")), Some(0.75));
        assert_eq!(implied_yes_probability(0.25, Some("Lakers")), None);
        assert_eq!(implied_yes_probability(1.5, Some("Yes")), None);
    }

    #[test]
    fn price_movement_of_a_series() {
        assert_eq!(price_movement(&[]), (0.0, 0.0));
        assert_eq!(price_movement(&[0.4]), (0.0, 0.0));
        let (change, range) = price_movement(&[0.5, 0.2, 0.75]);
        assert!((change - 50.0).abs() < 1e-9);
        assert!((range - 0.55).abs() < 1e-9);
    }

    #[test]
    fn policy_validation() {
        assert!(SuspicionPolicy::default().validate().is_ok());
        let bad = SuspicionPolicy { flagged_weight: -1.0, ..SuspicionPolicy::default() };
        assert!(bad.validate().is_err());
        let bad = SuspicionPolicy { change_saturation_pct: 0.0, ..SuspicionPolicy::default() };
        assert!(bad.validate().is_err());
    }
}

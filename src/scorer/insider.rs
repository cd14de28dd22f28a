use serde::Serialize;

/// Component A ceiling: share of the account's trades that were flagged.
pub const FLAGGED_RATIO_MAX: f64 = 40.0;
/// Component B ceiling: how extreme the flagged trades were.
pub const Z_MAGNITUDE_MAX: f64 = 30.0;
/// Component C ceiling: flagged share over the trailing recency window.
pub const RECENCY_MAX: f64 = 30.0;
/// Average flagged Z at which component B saturates (3 → 10, 6 → 20, 9 → 30).
pub const Z_SATURATION: f64 = 9.0;

pub const SCORE_MAX: f64 = 100.0;

/// Counters the insider score is derived from. Everything here is stored on
/// the account profile, so the score can be re-derived at any time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreInputs {
    pub total_trades: u64,
    pub flagged_count: u64,
    pub avg_flagged_z: f64,
    pub recent_flagged: u64,
    pub recent_total: u64,
}

impl ScoreInputs {
    /// Build inputs from raw profile counters. `flagged_z_sum` is the sum of
    /// Z-scores of the account's flagged trades.
    pub fn from_counters(
        total_trades: u64,
        flagged_count: u64,
        flagged_z_sum: f64,
        recent_total: u64,
        recent_flagged: u64,
    ) -> Self {
        let avg_flagged_z = if flagged_count > 0 {
            flagged_z_sum / flagged_count as f64
        } else {
            0.0
        };
        Self {
            total_trades,
            flagged_count,
            avg_flagged_z,
            recent_flagged,
            recent_total,
        }
    }

    pub fn breakdown(&self) -> ScoreBreakdown {
        let flagged_ratio = if self.total_trades == 0 {
            0.0
        } else {
            clamp_component(
                self.flagged_count as f64 / self.total_trades as f64 * FLAGGED_RATIO_MAX,
                FLAGGED_RATIO_MAX,
            )
        };

        let z_magnitude = if self.flagged_count == 0 {
            0.0
        } else {
            clamp_component(self.avg_flagged_z / Z_SATURATION * Z_MAGNITUDE_MAX, Z_MAGNITUDE_MAX)
        };

        let recency = if self.recent_total == 0 {
            0.0
        } else {
            clamp_component(
                self.recent_flagged as f64 / self.recent_total as f64 * RECENCY_MAX,
                RECENCY_MAX,
            )
        };

        ScoreBreakdown {
            flagged_ratio,
            z_magnitude,
            recency,
            total: (flagged_ratio + z_magnitude + recency).min(SCORE_MAX),
        }
    }

    /// Composite insider-confidence score in `[0, 100]`.
    pub fn score(&self) -> f64 {
        self.breakdown().total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub flagged_ratio: f64,
    pub z_magnitude: f64,
    pub recency: f64,
    pub total: f64,
}

fn clamp_component(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

/// Summary statistics over a bounded window of an account's trade sizes.
///
/// Built fresh from storage on every use; nothing here outlives a single
/// reconciliation step, so a restart loses no state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    /// Sample standard deviation (N-1 denominator). `0.0` with fewer than two
    /// samples, which the classifier treats as "no baseline".
    pub std_dev: f64,
    pub count: usize,
    pub max: f64,
}

impl WindowStats {
    pub const EMPTY: WindowStats = WindowStats { mean: 0.0, std_dev: 0.0, count: 0, max: 0.0 };

    /// Computes mean, sample standard deviation, count and max in a single
    /// Welford pass.
    pub fn from_sizes(sizes: &[f64]) -> Self {
        if sizes.is_empty() {
            return Self::EMPTY;
        }

        let mut mean = 0.0;
        let mut m2 = 0.0;
        let mut max = f64::NEG_INFINITY;
        for (i, &x) in sizes.iter().enumerate() {
            let n = (i + 1) as f64;
            let delta = x - mean;
            mean += delta / n;
            m2 += delta * (x - mean);
            if x > max {
                max = x;
            }
        }

        let count = sizes.len();
        let std_dev = if count >= 2 {
            (m2 / (count - 1) as f64).max(0.0).sqrt()
        } else {
            0.0
        };

        Self { mean, std_dev, count, max }
    }

    /// True when there are enough samples for a Z-score to mean anything.
    pub fn has_baseline(&self) -> bool {
        self.count >= 2 && self.std_dev > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_window_is_all_zero() {
        assert_eq!(WindowStats::from_sizes(&[]), WindowStats::EMPTY);
    }

    #[test]
    fn single_sample_has_zero_std() {
        let s = WindowStats::from_sizes(&[1234.0]);
        assert_eq!(s.count, 1);
        assert_eq!(s.mean, 1234.0);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.max, 1234.0);
        assert!(!s.has_baseline());
    }

    #[test]
    fn uses_sample_standard_deviation() {
        // Population std of this set is 2.0; sample std is sqrt(32/7).
        let s = WindowStats::from_sizes(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!(approx(s.mean, 5.0));
        assert!(approx(s.std_dev, (32.0f64 / 7.0).sqrt()), "std={}", s.std_dev);
        assert_eq!(s.count, 8);
        assert_eq!(s.max, 9.0);
    }

    #[test]
    fn constant_sizes_have_exactly_zero_std() {
        let s = WindowStats::from_sizes(&[500.0; 99]);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.mean, 500.0);
        assert!(!s.has_baseline());
    }

    #[test]
    fn stable_for_large_offsets() {
        let base = 1e9;
        let s = WindowStats::from_sizes(&[base + 4.0, base + 7.0, base + 13.0, base + 16.0]);
        assert!((s.mean - (base + 10.0)).abs() < 1e-6);
        assert!((s.std_dev - 30.0f64.sqrt()).abs() < 1e-6, "std={}", s.std_dev);
    }
}

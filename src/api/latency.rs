//! In-memory latency histogram for trade-source fetches.
//! The ingestor records each FETCHING phase; the API reads percentiles.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared fetch latency stats. Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencyStats {
    /// Tracks 1ms to 10 minutes, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    /// Values beyond the tracked range are clamped, not dropped.
    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        if let Ok(mut h) = self.inner.lock() {
            h.saturating_record(ms.max(1));
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let empty = LatencySnapshot { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        let Ok(h) = self.inner.lock() else {
            return empty;
        };
        if h.len() == 0 {
            return empty;
        }
        LatencySnapshot {
            samples: h.len(),
            p50_ms: Some(h.value_at_quantile(0.5)),
            p95_ms: Some(h.value_at_quantile(0.95)),
            p99_ms: Some(h.value_at_quantile(0.99)),
            max_ms: Some(h.max()),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 0);
        assert!(snap.p50_ms.is_none());
    }

    #[test]
    fn records_in_milliseconds() {
        let stats = LatencyStats::new();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        stats.record(Duration::from_secs(3_600));
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 101);
        let p50 = snap.p50_ms.unwrap();
        assert!((49..=52).contains(&p50), "p50 was {p50}");
        // An hour-long fetch saturates at the upper bound.
        assert!(snap.max_ms.unwrap() >= 599_000);
    }
}

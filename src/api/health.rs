//! Shared health state for the /health endpoint.
//! Updated by the ingestor, the market aggregator and the resolution sweeper.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use crate::types::CycleReport;

/// Shared health metrics. Updated by background tasks, read by API.
#[derive(Default)]
pub struct HealthState {
    /// False once a poll cycle fails; reset by the next successful one.
    last_cycle_ok: AtomicBool,
    /// Unix seconds of the last completed poll cycle (0 = none).
    last_poll_at: AtomicI64,
    consecutive_failures: AtomicU64,
    trades_ingested: AtomicU64,
    trades_flagged: AtomicU64,
    duplicates_skipped: AtomicU64,
    malformed_skipped: AtomicU64,
    last_aggregate_at: AtomicI64,
    last_sweep_at: AtomicI64,
    markets_resolved: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub last_cycle_ok: bool,
    pub last_poll_at: Option<i64>,
    pub consecutive_failures: u64,
    pub trades_ingested: u64,
    pub trades_flagged: u64,
    pub duplicates_skipped: u64,
    pub malformed_skipped: u64,
    pub last_aggregate_at: Option<i64>,
    pub last_sweep_at: Option<i64>,
    pub markets_resolved: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, report: &CycleReport, now: i64) {
        self.last_cycle_ok.store(true, Ordering::Relaxed);
        self.last_poll_at.store(now, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.trades_ingested.fetch_add(report.inserted as u64, Ordering::Relaxed);
        self.trades_flagged.fetch_add(report.flagged as u64, Ordering::Relaxed);
        self.duplicates_skipped.fetch_add(report.duplicates as u64, Ordering::Relaxed);
        self.malformed_skipped.fetch_add(report.malformed as u64, Ordering::Relaxed);
    }

    pub fn record_cycle_failure(&self, now: i64) {
        self.last_cycle_ok.store(false, Ordering::Relaxed);
        self.last_poll_at.store(now, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregation(&self, now: i64) {
        self.last_aggregate_at.store(now, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, now: i64, markets_resolved: usize) {
        self.last_sweep_at.store(now, Ordering::Relaxed);
        self.markets_resolved.fetch_add(markets_resolved as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_poll_at = nonzero(self.last_poll_at.load(Ordering::Relaxed));
        let last_cycle_ok = self.last_cycle_ok.load(Ordering::Relaxed);
        let status = match (last_poll_at, last_cycle_ok) {
            (None, _) => "starting",
            (Some(_), true) => "ok",
            (Some(_), false) => "degraded",
        };
        HealthSnapshot {
            status,
            last_cycle_ok,
            last_poll_at,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            trades_ingested: self.trades_ingested.load(Ordering::Relaxed),
            trades_flagged: self.trades_flagged.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            malformed_skipped: self.malformed_skipped.load(Ordering::Relaxed),
            last_aggregate_at: nonzero(self.last_aggregate_at.load(Ordering::Relaxed)),
            last_sweep_at: nonzero(self.last_sweep_at.load(Ordering::Relaxed)),
            markets_resolved: self.markets_resolved.load(Ordering::Relaxed),
        }
    }
}

fn nonzero(ts: i64) -> Option<i64> {
    (ts != 0).then_some(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_then_success_resets_streak() {
        let health = HealthState::new();
        assert_eq!(health.snapshot().status, "starting");

        health.record_cycle_failure(100);
        health.record_cycle_failure(130);
        let snap = health.snapshot();
        assert_eq!(snap.status, "degraded");
        assert_eq!(snap.consecutive_failures, 2);

        let report = CycleReport { fetched: 5, inserted: 3, duplicates: 2, flagged: 1, ..CycleReport::default() };
        health.record_cycle(&report, 160);
        let snap = health.snapshot();
        assert_eq!(snap.status, "ok");
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.trades_ingested, 3);
        assert_eq!(snap.duplicates_skipped, 2);
        assert_eq!(snap.last_poll_at, Some(160));
    }
}

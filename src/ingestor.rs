use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{Config, DetectionPolicy};
use crate::db::{IngestOutcome, TradeWriter};
use crate::error::{AppError, Result};
use crate::source::{RawTrade, TradeSource};
use crate::types::{now_secs, CyclePhase, CycleReport, NewTrade};

/// Polls the trade source and reconciles each batch into storage.
pub struct Ingestor {
    source: Arc<dyn TradeSource>,
    writer: TradeWriter,
    detection: DetectionPolicy,
    poll_interval: Duration,
    fetch_timeout: Duration,
    fetch_limit: usize,
    min_trade_size_usd: f64,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl Ingestor {
    pub fn new(
        cfg: &Config,
        source: Arc<dyn TradeSource>,
        writer: TradeWriter,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            source,
            writer,
            detection: cfg.detection,
            poll_interval: cfg.poll_interval,
            fetch_timeout: cfg.fetch_timeout,
            fetch_limit: cfg.trade_fetch_limit,
            min_trade_size_usd: cfg.min_trade_size_usd,
            health,
            latency,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            source = self.source.name(),
            interval_secs = self.poll_interval.as_secs(),
            "Ingestor started"
        );

        loop {
            ticker.tick().await;
            let now = now_secs();
            match self.poll_once(now).await {
                Ok(report) => {
                    self.health.record_cycle(&report, now);
                    info!(
                        fetched = report.fetched,
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        malformed = report.malformed,
                        below_minimum = report.below_minimum,
                        flagged = report.flagged,
                        "Poll cycle complete"
                    );
                }
                Err(e) if e.is_transient() => {
                    self.health.record_cycle_failure(now);
                    warn!("Trade source unavailable, skipping cycle: {e}");
                }
                Err(e) => {
                    self.health.record_cycle_failure(now);
                    error!("Poll cycle aborted: {e}");
                }
            }
        }
    }

    /// One FETCHING → RECONCILING pass.
    pub async fn poll_once(&self, now: i64) -> Result<CycleReport> {
        debug!(phase = %CyclePhase::Fetching, source = self.source.name(), "Cycle phase");
        let started = Instant::now();
        let raw = tokio::time::timeout(self.fetch_timeout, self.source.fetch_recent(self.fetch_limit))
            .await
            .map_err(|_| AppError::Timeout(self.fetch_timeout))??;
        self.latency.record(started.elapsed());

        debug!(phase = %CyclePhase::Reconciling, records = raw.len(), "Cycle phase");
        self.reconcile(raw, now).await
    }

    /// Validate, order and persist one batch. A storage error stops the batch;
    /// whatever committed before it stays committed.
    pub async fn reconcile(&self, raw: Vec<RawTrade>, now: i64) -> Result<CycleReport> {
        let mut report = CycleReport { fetched: raw.len(), ..CycleReport::default() };

        let mut trades: Vec<NewTrade> = Vec::with_capacity(raw.len());
        for record in raw {
            match record.validate() {
                Ok(trade) if trade.size_usd < self.min_trade_size_usd => report.below_minimum += 1,
                Ok(trade) => trades.push(trade),
                Err(e) => {
                    report.malformed += 1;
                    warn!("Skipping record: {e}");
                }
            }
        }
        trades.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.tx_ref.cmp(&b.tx_ref)));

        for trade in &trades {
            match self.writer.ingest(trade, &self.detection, now).await? {
                IngestOutcome::Duplicate => {
                    report.duplicates += 1;
                    debug!(key = ?trade.natural_key(), "Duplicate trade skipped");
                }
                IngestOutcome::Inserted(inserted) => {
                    report.inserted += 1;
                    if inserted.classification.is_flagged {
                        report.flagged += 1;
                        info!(
                            trade_id = inserted.trade_id,
                            account_id = %trade.account_id,
                            market_id = %trade.market_id,
                            size_usd = trade.size_usd,
                            z_score = inserted.classification.z_score,
                            baseline_mean = inserted.baseline.mean,
                            baseline_max = inserted.baseline.max,
                            insider_score = inserted.insider_score,
                            "Flagged trade"
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}

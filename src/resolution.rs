use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::config::{Config, RESOLUTION_CONCURRENCY};
use crate::db::begin_write;
use crate::db::models::UnsettledTradeRow;
use crate::db::writer::refresh_resolution_counters;
use crate::error::{AppError, Result};
use crate::scorer::market_scorer::aggregate_market;
use crate::scorer::SuspicionPolicy;
use crate::source::ResolutionSource;
use crate::types::{now_secs, ResolutionSignal, Side};

/// Result of settling one trade against a market's winning outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settlement {
    pub is_win: bool,
    pub pnl_usd: f64,
}

/// Settle a trade of `size_usd` at `price` once `winner` is known.
///
/// A buy wins when its outcome is the winner; a sell wins when it is not.
/// Winning buys earn `size * (1 - p) / p`, losing buys lose `size`. Sells
/// mirror that: a winning sell earns `size`, a losing one loses
/// `size * (1 - p) / p`. No outcome settles as a loss with zero PnL, and a
/// missing or zero price leaves PnL at zero.
pub fn settle(size_usd: f64, side: Option<Side>, outcome: Option<&str>, price: Option<f64>, winner: &str) -> Settlement {
    let Some(outcome) = outcome else {
        return Settlement { is_win: false, pnl_usd: 0.0 };
    };
    let picked_winner = outcome.trim().eq_ignore_ascii_case(winner.trim());
    let side = side.unwrap_or(Side::Buy);
    let is_win = match side {
        Side::Buy => picked_winner,
        Side::Sell => !picked_winner,
    };

    let pnl_usd = match price {
        Some(p) if p > 0.0 && p.is_finite() => {
            let upside = size_usd * (1.0 - p) / p;
            match (side, is_win) {
                (Side::Buy, true) => upside,
                (Side::Buy, false) => -size_usd,
                (Side::Sell, true) => size_usd,
                (Side::Sell, false) => -upside,
            }
        }
        _ => 0.0,
    };

    Settlement { is_win, pnl_usd }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub lookups_failed: usize,
    pub markets_resolved: usize,
    pub trades_settled: usize,
    /// Trades settled late against an already-resolved market.
    pub late_trades_settled: usize,
}

struct CachedSignal {
    signal: ResolutionSignal,
    fetched_at: Instant,
}

/// Background task that finalises markets and settles their trades.
pub struct ResolutionSweeper {
    pool: SqlitePool,
    source: Arc<dyn ResolutionSource>,
    cache: DashMap<String, CachedSignal>,
    /// Last market checked; the next sweep continues after it.
    cursor: Mutex<Option<String>>,
    policy: SuspicionPolicy,
    interval: Duration,
    fetch_timeout: Duration,
    batch_size: usize,
    cache_ttl: Duration,
    health: Arc<HealthState>,
}

impl ResolutionSweeper {
    pub fn new(cfg: &Config, pool: SqlitePool, source: Arc<dyn ResolutionSource>, health: Arc<HealthState>) -> Self {
        Self {
            pool,
            source,
            cache: DashMap::new(),
            cursor: Mutex::new(None),
            policy: cfg.suspicion,
            interval: cfg.resolution_interval,
            fetch_timeout: cfg.fetch_timeout,
            batch_size: cfg.resolution_batch_size,
            cache_ttl: cfg.resolution_cache_ttl,
            health,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // first sweep after one interval; nothing to settle at startup
        info!(
            source = self.source.name(),
            interval_secs = self.interval.as_secs(),
            "Resolution sweeper started"
        );

        loop {
            ticker.tick().await;
            let now = now_secs();
            match self.sweep_once(now).await {
                Ok(report) => {
                    self.health.record_sweep(now, report.markets_resolved);
                    info!(
                        checked = report.checked,
                        failed = report.lookups_failed,
                        resolved = report.markets_resolved,
                        settled = report.trades_settled,
                        late_settled = report.late_trades_settled,
                        "Resolution sweep complete"
                    );
                }
                Err(e) => error!("Resolution sweep error: {e}"),
            }
        }
    }

    pub async fn sweep_once(&self, now: i64) -> Result<SweepReport> {
        let mut report = SweepReport {
            late_trades_settled: self.settle_late_trades().await?,
            ..SweepReport::default()
        };

        let candidates = self.next_candidates().await?;
        report.checked = candidates.len();

        let answers: Vec<(String, Result<ResolutionSignal>)> = stream::iter(candidates)
            .map(|market_id| async move {
                let signal = self.lookup(&market_id).await;
                (market_id, signal)
            })
            .buffer_unordered(RESOLUTION_CONCURRENCY)
            .collect()
            .await;

        for (market_id, answer) in answers {
            let signal = match answer {
                Ok(signal) => signal,
                Err(e) => {
                    report.lookups_failed += 1;
                    warn!(market_id = %market_id, "Resolution lookup failed: {e}");
                    continue;
                }
            };
            let Some(winner) = signal.settleable_winner() else {
                if signal.resolved {
                    debug!(market_id = %market_id, "Resolved without a winner yet");
                }
                continue;
            };

            if let Some(settled) = self.resolve_market(&market_id, winner, now).await? {
                report.markets_resolved += 1;
                report.trades_settled += settled;
                self.cache.remove(&market_id);
                info!(market_id = %market_id, winner, settled, "Market resolved");
            }
        }

        Ok(report)
    }

    /// Next batch of unresolved markets in market-id order, resuming after
    /// the previous batch and wrapping to the start so every market gets
    /// its turn.
    async fn next_candidates(&self) -> Result<Vec<String>> {
        let mut cursor = self.cursor.lock().await;
        let after = cursor.clone().unwrap_or_default();

        let mut batch = unresolved_markets(&self.pool, ">", &after, self.batch_size).await?;
        if batch.len() < self.batch_size && cursor.is_some() {
            let wrapped = unresolved_markets(&self.pool, "<=", &after, self.batch_size - batch.len()).await?;
            batch.extend(wrapped);
        }

        *cursor = batch.last().cloned();
        Ok(batch)
    }

    /// Cached answer while fresh, otherwise ask the source under the fetch
    /// timeout. Only unresolved answers are cached.
    async fn lookup(&self, market_id: &str) -> Result<ResolutionSignal> {
        if let Some(hit) = self.cache.get(market_id) {
            if hit.fetched_at.elapsed() < self.cache_ttl {
                return Ok(hit.signal.clone());
            }
        }

        let signal = tokio::time::timeout(self.fetch_timeout, self.source.check(market_id))
            .await
            .map_err(|_| AppError::Timeout(self.fetch_timeout))??;
        if signal.settleable_winner().is_none() {
            self.cache.insert(
                market_id.to_string(),
                CachedSignal { signal: signal.clone(), fetched_at: Instant::now() },
            );
        }
        Ok(signal)
    }

    /// Freeze the market's final aggregate, mark it resolved and settle its
    /// trades in one transaction. `None` when another sweep already resolved it.
    async fn resolve_market(&self, market_id: &str, winner: &str, now: i64) -> Result<Option<usize>> {
        let mut tx = begin_write(&self.pool).await?;

        // The row is frozen from here on, so it must carry the final totals.
        aggregate_market(&mut tx, market_id, &self.policy, now).await?;

        let flipped = sqlx::query(
            r#"
            UPDATE market_aggregates
            SET resolved = 1, winning_outcome = ?, resolved_at = ?
            WHERE market_id = ? AND resolved = 0
            "#,
        )
        .bind(winner)
        .bind(now)
        .bind(market_id)
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() == 0 {
            return Ok(None);
        }

        let settled = settle_market_trades(&mut tx, market_id, winner).await?;
        tx.commit().await?;
        Ok(Some(settled))
    }

    /// Settle trades that landed after their market was resolved.
    async fn settle_late_trades(&self) -> Result<usize> {
        let pending: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT m.market_id, m.winning_outcome
            FROM market_aggregates m
            WHERE m.resolved = 1
              AND m.winning_outcome IS NOT NULL
              AND EXISTS (SELECT 1 FROM trades t WHERE t.market_id = m.market_id AND t.is_win IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut settled = 0;
        for (market_id, winner) in pending {
            let mut tx = begin_write(&self.pool).await?;
            let n = settle_market_trades(&mut tx, &market_id, &winner).await?;
            tx.commit().await?;
            debug!(market_id = %market_id, settled = n, "Late trades settled");
            settled += n;
        }
        Ok(settled)
    }
}

/// Unresolved markets with trades whose id compares `cmp` (`>` or `<=`)
/// against `pivot`, in id order.
async fn unresolved_markets(pool: &SqlitePool, cmp: &'static str, pivot: &str, limit: usize) -> Result<Vec<String>> {
    let sql = format!(
        r#"
        SELECT DISTINCT t.market_id
        FROM trades t
        LEFT JOIN market_aggregates m ON m.market_id = t.market_id
        WHERE (m.market_id IS NULL OR m.resolved = 0)
          AND t.market_id {cmp} ?
        ORDER BY t.market_id
        LIMIT ?
        "#
    );
    let markets = sqlx::query_scalar(&sql)
        .bind(pivot)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
    Ok(markets)
}

/// Settle every unsettled trade of a market and refresh the affected
/// accounts' counters. Returns the number of trades settled.
async fn settle_market_trades(conn: &mut SqliteConnection, market_id: &str, winner: &str) -> Result<usize> {
    let trades: Vec<UnsettledTradeRow> = sqlx::query_as(
        r#"
        SELECT id, account_id, size_usd, side, outcome, price
        FROM trades
        WHERE market_id = ? AND is_win IS NULL
        "#,
    )
    .bind(market_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut accounts = BTreeSet::new();
    for trade in &trades {
        let side = trade.side.as_deref().and_then(Side::parse);
        let s = settle(trade.size_usd, side, trade.outcome.as_deref(), trade.price, winner);
        sqlx::query("UPDATE trades SET is_win = ?, pnl_usd = ? WHERE id = ? AND is_win IS NULL")
            .bind(s.is_win)
            .bind(s.pnl_usd)
            .bind(trade.id)
            .execute(&mut *conn)
            .await?;
        accounts.insert(trade.account_id.as_str());
    }

    for account_id in accounts {
        refresh_resolution_counters(&mut *conn, account_id).await?;
    }
    Ok(trades.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::DetectionPolicy;
    use crate::db::models::{AccountProfileRow, MarketAggregateRow, TradeRow};
    use crate::db::{test_pool, TradeWriter};
    use crate::scorer::{MarketAggregator, SuspicionPolicy};
    use crate::types::{test_trade, NewTrade};

    const NOW: i64 = 1_700_000_000;

    /// Always answers the same signal and counts calls.
    struct FixedSource {
        signal: ResolutionSignal,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(signal: ResolutionSignal) -> Arc<Self> {
            Arc::new(Self { signal, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl ResolutionSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn check(&self, _market_id: &str) -> Result<ResolutionSignal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.signal.clone())
        }
    }

    /// Resolves one market to "Yes" and reports every other as still open.
    struct SingleWinner {
        market_id: &'static str,
        asked: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResolutionSource for SingleWinner {
        fn name(&self) -> &str {
            "single-winner"
        }

        async fn check(&self, market_id: &str) -> Result<ResolutionSignal> {
            self.asked.lock().unwrap().push(market_id.to_string());
            if market_id == self.market_id {
                Ok(ResolutionSignal::resolved("Yes"))
            } else {
                Ok(ResolutionSignal::unresolved())
            }
        }
    }

    fn sweeper(pool: &SqlitePool, source: Arc<dyn ResolutionSource>) -> ResolutionSweeper {
        let cfg = Config::from_lookup(|_| None).unwrap();
        ResolutionSweeper::new(&cfg, pool.clone(), source, Arc::new(HealthState::new()))
    }

    fn bet(account: &str, tx: &str, side: Side, outcome: &str, price: f64, size: f64) -> NewTrade {
        NewTrade {
            side: Some(side),
            outcome: Some(outcome.to_string()),
            price: Some(price),
            ..test_trade(account, tx, size, NOW - 100)
        }
    }

    async fn seed(pool: &SqlitePool) {
        let writer = TradeWriter::new(pool.clone());
        let policy = DetectionPolicy::default();
        for t in [
            bet("0xa", "1", Side::Buy, "Yes", 0.25, 100.0),
            bet("0xa", "2", Side::Buy, "No", 0.50, 200.0),
            bet("0xb", "3", Side::Sell, "No", 0.40, 80.0),
        ] {
            writer.ingest(&t, &policy, NOW).await.unwrap();
        }
    }

    async fn market(pool: &SqlitePool) -> MarketAggregateRow {
        sqlx::query_as("SELECT * FROM market_aggregates WHERE market_id = '0xmarket'")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn profile(pool: &SqlitePool, account_id: &str) -> AccountProfileRow {
        sqlx::query_as("SELECT * FROM account_profiles WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn settlement_math() {
        let buy_win = settle(100.0, Some(Side::Buy), Some("Yes"), Some(0.25), "yes");
        assert!(buy_win.is_win);
        assert!((buy_win.pnl_usd - 300.0).abs() < 1e-9);

        let buy_loss = settle(100.0, Some(Side::Buy), Some("No"), Some(0.25), "Yes");
        assert_eq!(buy_loss, Settlement { is_win: false, pnl_usd: -100.0 });

        let sell_win = settle(80.0, Some(Side::Sell), Some("No"), Some(0.4), "Yes");
        assert_eq!(sell_win, Settlement { is_win: true, pnl_usd: 80.0 });

        let sell_loss = settle(80.0, Some(Side::Sell), Some("Yes"), Some(0.4), "Yes");
        assert!(!sell_loss.is_win);
        assert!((sell_loss.pnl_usd + 120.0).abs() < 1e-9);
    }

    #[test]
    fn settlement_edge_cases() {
        assert_eq!(
            settle(100.0, Some(Side::Buy), None, Some(0.5), "Yes"),
            Settlement { is_win: false, pnl_usd: 0.0 }
        );
        let no_price = settle(100.0, Some(Side::Buy), Some("Yes"), None, "Yes");
        assert_eq!(no_price, Settlement { is_win: true, pnl_usd: 0.0 });
        let zero_price = settle(100.0, Some(Side::Buy), Some("Yes"), Some(0.0), "Yes");
        assert_eq!(zero_price.pnl_usd, 0.0);
        // Unknown side settles as a buy.
        assert!(settle(10.0, None, Some("Yes"), Some(0.5), "Yes").is_win);
    }

    #[tokio::test]
    async fn resolution_flips_exactly_once() {
        let pool = test_pool().await;
        seed(&pool).await;
        let source = FixedSource::new(ResolutionSignal::resolved("Yes"));
        let sweeper = sweeper(&pool, source.clone());

        let first = sweeper.sweep_once(NOW).await.unwrap();
        assert_eq!(first.markets_resolved, 1);
        assert_eq!(first.trades_settled, 3);
        let resolved = market(&pool).await;
        assert!(resolved.resolved);
        assert_eq!(resolved.winning_outcome.as_deref(), Some("Yes"));
        assert_eq!(resolved.resolved_at, Some(NOW));
        assert_eq!(resolved.category, "crypto");

        let second = sweeper.sweep_once(NOW + 3_600).await.unwrap();
        assert_eq!(second.checked, 0);
        assert_eq!(second.markets_resolved, 0);
        assert_eq!(market(&pool).await.resolved_at, Some(NOW));

        // The aggregator no longer touches the frozen row.
        let aggregator = MarketAggregator::new(
            pool.clone(),
            SuspicionPolicy::default(),
            Duration::from_secs(30),
            Arc::new(HealthState::new()),
        );
        assert_eq!(aggregator.aggregate_all(NOW + 7_200).await.unwrap(), 0);
        assert_eq!(market(&pool).await.updated_at, resolved.updated_at);
    }

    #[tokio::test]
    async fn settles_trades_and_account_counters() {
        let pool = test_pool().await;
        seed(&pool).await;
        sweeper(&pool, FixedSource::new(ResolutionSignal::resolved("Yes")))
            .sweep_once(NOW)
            .await
            .unwrap();

        let trades: Vec<TradeRow> = sqlx::query_as("SELECT * FROM trades ORDER BY tx_ref")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(trades[0].is_win, Some(true));
        assert!((trades[0].pnl_usd.unwrap() - 300.0).abs() < 1e-9);
        assert_eq!(trades[1].is_win, Some(false));
        assert_eq!(trades[1].pnl_usd, Some(-200.0));
        assert_eq!(trades[2].is_win, Some(true));
        assert_eq!(trades[2].pnl_usd, Some(80.0));

        let a = profile(&pool, "0xa").await;
        assert_eq!((a.resolved_trades, a.winning_trades), (2, 1));
        assert!((a.total_pnl - 100.0).abs() < 1e-9);
        assert_eq!(a.win_rate(), 50.0);
        // Ingestion-owned fields are untouched by settlement.
        assert_eq!(a.total_trades, 2);

        let b = profile(&pool, "0xb").await;
        assert_eq!((b.resolved_trades, b.winning_trades), (1, 1));
    }

    #[tokio::test]
    async fn unresolved_and_winnerless_markets_are_skipped() {
        let pool = test_pool().await;
        seed(&pool).await;

        for signal in [ResolutionSignal::unresolved(), ResolutionSignal { resolved: true, winning_outcome: None }] {
            let report = sweeper(&pool, FixedSource::new(signal)).sweep_once(NOW).await.unwrap();
            assert_eq!(report.checked, 1);
            assert_eq!(report.markets_resolved, 0);
        }
        let unsettled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE is_win IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(unsettled, 3);
    }

    #[tokio::test]
    async fn unresolved_answers_are_cached() {
        let pool = test_pool().await;
        seed(&pool).await;
        let source = FixedSource::new(ResolutionSignal::unresolved());
        let sweeper = sweeper(&pool, source.clone());

        sweeper.sweep_once(NOW).await.unwrap();
        sweeper.sweep_once(NOW + 1).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backlog_larger_than_a_batch_is_rotated() {
        let pool = test_pool().await;
        let writer = TradeWriter::new(pool.clone());
        for (i, market_id) in ["m-a", "m-b", "m-c"].into_iter().enumerate() {
            let trade = NewTrade {
                market_id: market_id.to_string(),
                ..bet("0xa", &format!("r{i}"), Side::Buy, "Yes", 0.5, 100.0)
            };
            writer.ingest(&trade, &DetectionPolicy::default(), NOW).await.unwrap();
        }

        let cfg = Config::from_lookup(|key| (key == "RESOLUTION_BATCH_SIZE").then(|| "2".to_string())).unwrap();
        let source = Arc::new(SingleWinner { market_id: "m-c", asked: Default::default() });
        let sweeper = ResolutionSweeper::new(&cfg, pool.clone(), source.clone(), Arc::new(HealthState::new()));

        let first = sweeper.sweep_once(NOW).await.unwrap();
        assert_eq!((first.checked, first.markets_resolved), (2, 0));
        let mut asked = source.asked.lock().unwrap().clone();
        asked.sort();
        assert_eq!(asked, vec!["m-a", "m-b"]);

        let second = sweeper.sweep_once(NOW + 3_600).await.unwrap();
        assert_eq!(second.checked, 2);
        assert_eq!(second.markets_resolved, 1);
        let resolved: Vec<String> = sqlx::query_scalar("SELECT market_id FROM market_aggregates WHERE resolved = 1")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(resolved, vec!["m-c"]);

        // The two open markets keep taking turns.
        let third = sweeper.sweep_once(NOW + 7_200).await.unwrap();
        assert_eq!((third.checked, third.markets_resolved), (2, 0));
    }

    #[tokio::test]
    async fn market_resolved_before_aggregation_keeps_its_totals() {
        let pool = test_pool().await;
        seed(&pool).await;
        let no_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM market_aggregates")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(no_rows, 0);

        sweeper(&pool, FixedSource::new(ResolutionSignal::resolved("Yes")))
            .sweep_once(NOW)
            .await
            .unwrap();

        let m = market(&pool).await;
        assert!(m.resolved);
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.unique_accounts, 2);
        assert_eq!(m.total_volume, 380.0);
        assert_eq!(m.category, "crypto");
    }

    #[tokio::test]
    async fn late_trades_settle_on_next_sweep() {
        let pool = test_pool().await;
        seed(&pool).await;
        let sweeper = sweeper(&pool, FixedSource::new(ResolutionSignal::resolved("No")));
        sweeper.sweep_once(NOW).await.unwrap();

        let writer = TradeWriter::new(pool.clone());
        writer
            .ingest(&bet("0xc", "4", Side::Buy, "No", 0.5, 60.0), &DetectionPolicy::default(), NOW + 10)
            .await
            .unwrap();

        let report = sweeper.sweep_once(NOW + 3_600).await.unwrap();
        assert_eq!(report.late_trades_settled, 1);
        assert_eq!(report.markets_resolved, 0);

        let c = profile(&pool, "0xc").await;
        assert_eq!((c.resolved_trades, c.winning_trades), (1, 1));
        assert!((c.total_pnl - 60.0).abs() < 1e-9);
    }
}

use std::sync::Arc;
use std::time::Duration;

use sqlx::{SqliteConnection, SqlitePool};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::config::SECS_PER_DAY;
use crate::db::begin_write;
use crate::db::models::MarketTotalsRow;
use crate::error::Result;
use crate::scorer::suspicion::{self, implied_yes_probability, price_movement, MarketStats, SuspicionPolicy};
use crate::types::{now_secs, Category};

/// Priced trades scanned for the latest Yes/No quote.
const LATEST_PRICE_SCAN: i64 = 50;

/// Background task that rebuilds every open market's aggregate row from the
/// trades table. Resolved markets are frozen and never touched.
pub struct MarketAggregator {
    pool: SqlitePool,
    policy: SuspicionPolicy,
    interval: Duration,
    health: Arc<HealthState>,
}

impl MarketAggregator {
    pub fn new(pool: SqlitePool, policy: SuspicionPolicy, interval: Duration, health: Arc<HealthState>) -> Self {
        Self { pool, policy, interval, health }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let now = now_secs();
            match self.aggregate_all(now).await {
                Ok(updated) => {
                    self.health.record_aggregation(now);
                    info!(markets = updated, "Market aggregation complete");
                }
                Err(e) => error!("Market aggregation error: {e}"),
            }
        }
    }

    /// Recompute every unresolved market that has trades. Returns the number
    /// of aggregate rows written. A market that fails is logged and picked
    /// up again next tick; the rest of the pass carries on.
    pub async fn aggregate_all(&self, now: i64) -> Result<usize> {
        let market_ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT t.market_id
            FROM trades t
            LEFT JOIN market_aggregates m ON m.market_id = t.market_id
            WHERE m.market_id IS NULL OR m.resolved = 0
            ORDER BY t.market_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut updated = 0;
        for market_id in &market_ids {
            match self.aggregate_one(market_id, now).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => warn!(market_id = %market_id, "Market aggregation failed: {e}"),
            }
        }
        Ok(updated)
    }

    async fn aggregate_one(&self, market_id: &str, now: i64) -> Result<bool> {
        let mut tx = begin_write(&self.pool).await?;
        let written = aggregate_market(&mut tx, market_id, &self.policy, now).await?;
        tx.commit().await?;
        Ok(written)
    }
}

/// Rebuild one market's row. Returns false when the market was resolved
/// between the scan and the write, in which case nothing changes.
pub(crate) async fn aggregate_market(
    conn: &mut SqliteConnection,
    market_id: &str,
    policy: &SuspicionPolicy,
    now: i64,
) -> Result<bool> {
    let totals: MarketTotalsRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) AS total_trades,
            COALESCE(SUM(CASE WHEN is_flagged THEN 1 ELSE 0 END), 0) AS flagged_trades,
            COUNT(DISTINCT account_id) AS unique_accounts,
            CAST(COALESCE(SUM(size_usd), 0) AS REAL) AS total_volume
        FROM trades
        WHERE market_id = ?
        "#,
    )
    .bind(market_id)
    .fetch_one(&mut *conn)
    .await?;

    let market_name: Option<String> = sqlx::query_scalar(
        "SELECT market_name FROM trades WHERE market_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
    )
    .bind(market_id)
    .fetch_optional(&mut *conn)
    .await?;
    let market_name = market_name.unwrap_or_default();
    let category = Category::from_market_name(&market_name);

    let day_quotes: Vec<(f64, Option<String>)> = sqlx::query_as(
        r#"
        SELECT price, outcome FROM trades
        WHERE market_id = ? AND timestamp >= ? AND price IS NOT NULL
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(market_id)
    .bind(now - SECS_PER_DAY)
    .fetch_all(&mut *conn)
    .await?;
    let series: Vec<f64> = day_quotes
        .iter()
        .filter_map(|(price, outcome)| implied_yes_probability(*price, outcome.as_deref()))
        .collect();
    let (price_change_24h, price_range_24h) = price_movement(&series);

    let latest_quotes: Vec<(f64, Option<String>)> = sqlx::query_as(
        r#"
        SELECT price, outcome FROM trades
        WHERE market_id = ? AND price IS NOT NULL
        ORDER BY timestamp DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(market_id)
    .bind(LATEST_PRICE_SCAN)
    .fetch_all(&mut *conn)
    .await?;
    let yes_price = latest_quotes
        .iter()
        .find_map(|(price, outcome)| implied_yes_probability(*price, outcome.as_deref()));
    let no_price = yes_price.map(|p| 1.0 - p);

    let stats = MarketStats {
        total_trades: totals.total_trades.max(0) as u64,
        flagged_trades: totals.flagged_trades.max(0) as u64,
        unique_accounts: totals.unique_accounts.max(0) as u64,
        total_volume: totals.total_volume,
        price_change_24h,
        price_range_24h,
    };
    let scores = suspicion::aggregate(&stats, policy);

    let written = sqlx::query(
        r#"
        INSERT INTO market_aggregates (
            market_id, market_name, category, total_trades, flagged_trades,
            unique_accounts, total_volume, yes_price, no_price, price_change_24h,
            volatility_score, suspicion_score, resolved, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        ON CONFLICT(market_id) DO UPDATE SET
            market_name = excluded.market_name,
            category = excluded.category,
            total_trades = excluded.total_trades,
            flagged_trades = excluded.flagged_trades,
            unique_accounts = excluded.unique_accounts,
            total_volume = excluded.total_volume,
            yes_price = excluded.yes_price,
            no_price = excluded.no_price,
            price_change_24h = excluded.price_change_24h,
            volatility_score = excluded.volatility_score,
            suspicion_score = excluded.suspicion_score,
            updated_at = excluded.updated_at
        WHERE market_aggregates.resolved = 0
        "#,
    )
    .bind(market_id)
    .bind(&market_name)
    .bind(category.to_string())
    .bind(totals.total_trades)
    .bind(totals.flagged_trades)
    .bind(totals.unique_accounts)
    .bind(totals.total_volume)
    .bind(yes_price)
    .bind(no_price)
    .bind(price_change_24h)
    .bind(scores.volatility_score)
    .bind(scores.suspicion_score)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(
        market_id,
        suspicion = scores.suspicion_score,
        volatility = scores.volatility_score,
        "Market scored"
    );
    Ok(written.rows_affected() > 0)
}

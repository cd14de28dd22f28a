use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::config::DetectionPolicy;
use crate::db::begin_write;
use crate::db::models::AccountTotalsRow;
use crate::detector::{classify_against, Classification, WindowStats};
use crate::error::Result;
use crate::scorer::ScoreInputs;
use crate::types::NewTrade;

/// What happened to one trade handed to [`TradeWriter::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The natural key was already stored; nothing changed.
    Duplicate,
    Inserted(InsertedTrade),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertedTrade {
    pub trade_id: i64,
    pub classification: Classification,
    /// Window the trade was classified against (excludes the trade itself).
    pub baseline: WindowStats,
    pub insider_score: f64,
}

/// Persists trades and keeps each account profile consistent with them.
///
/// Every call runs in one transaction: the trade row and the profile update
/// land together or not at all.
#[derive(Clone)]
pub struct TradeWriter {
    pool: SqlitePool,
}

impl TradeWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ingest(
        &self,
        trade: &NewTrade,
        policy: &DetectionPolicy,
        now: i64,
    ) -> Result<IngestOutcome> {
        let mut tx = begin_write(&self.pool).await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM trades WHERE account_id = ? AND market_id = ? AND tx_ref = ?",
        )
        .bind(&trade.account_id)
        .bind(&trade.market_id)
        .bind(&trade.tx_ref)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Ok(IngestOutcome::Duplicate);
        }

        let baseline = load_window(&mut tx, &trade.account_id, policy.window_size).await?;
        let classification = classify_against(trade.size_usd, &baseline, policy.z_score_threshold);

        let side = trade.side.map(|s| s.to_string());
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO trades (
                account_id, market_id, tx_ref, market_name, size_usd,
                side, outcome, price, timestamp, ingested_at,
                z_score, is_flagged
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.account_id)
        .bind(&trade.market_id)
        .bind(&trade.tx_ref)
        .bind(&trade.market_name)
        .bind(trade.size_usd)
        .bind(side)
        .bind(&trade.outcome)
        .bind(trade.price)
        .bind(trade.timestamp)
        .bind(now)
        .bind(classification.z_score)
        .bind(classification.is_flagged)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Ok(IngestOutcome::Duplicate);
        }
        let trade_id = inserted.last_insert_rowid();

        let insider_score = refresh_profile(&mut tx, &trade.account_id, policy, now).await?;
        tx.commit().await?;

        debug!(
            account_id = %trade.account_id,
            trade_id,
            z_score = classification.z_score,
            baseline_ready = baseline.has_baseline(),
            insider_score,
            "Trade stored"
        );

        Ok(IngestOutcome::Inserted(InsertedTrade {
            trade_id,
            classification,
            baseline,
            insider_score,
        }))
    }
}

/// Statistics over the account's `limit` most recent stored trades, ordered
/// by trade timestamp with insertion order breaking ties.
pub(crate) async fn load_window(
    conn: &mut SqliteConnection,
    account_id: &str,
    limit: usize,
) -> Result<WindowStats> {
    let sizes: Vec<f64> = sqlx::query_scalar(
        r#"
        SELECT size_usd FROM trades
        WHERE account_id = ?
        ORDER BY timestamp DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(account_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    Ok(WindowStats::from_sizes(&sizes))
}

/// Recompute the ingestion-owned profile fields from stored trades and
/// upsert them. Resolution counters are left alone. Returns the new score.
async fn refresh_profile(
    conn: &mut SqliteConnection,
    account_id: &str,
    policy: &DetectionPolicy,
    now: i64,
) -> Result<f64> {
    let recent_since = now - policy.recent_window_secs();
    let totals: AccountTotalsRow = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) AS total_trades,
            CAST(COALESCE(SUM(size_usd), 0) AS REAL) AS total_volume,
            CAST(COALESCE(MAX(size_usd), 0) AS REAL) AS max_size,
            COALESCE(SUM(CASE WHEN is_flagged THEN 1 ELSE 0 END), 0) AS flagged_count,
            CAST(COALESCE(SUM(CASE WHEN is_flagged THEN z_score ELSE 0 END), 0) AS REAL) AS flagged_z_sum,
            COALESCE(SUM(CASE WHEN timestamp >= ? THEN 1 ELSE 0 END), 0) AS recent_total,
            COALESCE(SUM(CASE WHEN timestamp >= ? AND is_flagged THEN 1 ELSE 0 END), 0) AS recent_flagged
        FROM trades
        WHERE account_id = ?
        "#,
    )
    .bind(recent_since)
    .bind(recent_since)
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;

    let window = load_window(&mut *conn, account_id, policy.window_size).await?;
    let inputs = ScoreInputs::from_counters(
        totals.total_trades.max(0) as u64,
        totals.flagged_count.max(0) as u64,
        totals.flagged_z_sum,
        totals.recent_total.max(0) as u64,
        totals.recent_flagged.max(0) as u64,
    );
    let insider_score = inputs.score();

    sqlx::query(
        r#"
        INSERT INTO account_profiles (
            account_id, total_trades, mean_size, std_size, max_size, total_volume,
            flagged_trades_count, flagged_z_sum, recent_trades_count, recent_flagged_count,
            insider_score, last_updated
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(account_id) DO UPDATE SET
            total_trades = excluded.total_trades,
            mean_size = excluded.mean_size,
            std_size = excluded.std_size,
            max_size = excluded.max_size,
            total_volume = excluded.total_volume,
            flagged_trades_count = excluded.flagged_trades_count,
            flagged_z_sum = excluded.flagged_z_sum,
            recent_trades_count = excluded.recent_trades_count,
            recent_flagged_count = excluded.recent_flagged_count,
            insider_score = excluded.insider_score,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(account_id)
    .bind(totals.total_trades)
    .bind(window.mean)
    .bind(window.std_dev)
    .bind(totals.max_size)
    .bind(totals.total_volume)
    .bind(totals.flagged_count)
    .bind(totals.flagged_z_sum)
    .bind(totals.recent_total)
    .bind(totals.recent_flagged)
    .bind(insider_score)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(insider_score)
}

/// Recompute an account's settlement counters from its settled trades.
pub(crate) async fn refresh_resolution_counters(conn: &mut SqliteConnection, account_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE account_profiles SET
            resolved_trades = (
                SELECT COUNT(*) FROM trades WHERE account_id = ? AND is_win IS NOT NULL
            ),
            winning_trades = (
                SELECT COUNT(*) FROM trades WHERE account_id = ? AND is_win = 1
            ),
            total_pnl = (
                SELECT CAST(COALESCE(SUM(pnl_usd), 0) AS REAL) FROM trades WHERE account_id = ?
            )
        WHERE account_id = ?
        "#,
    )
    .bind(account_id)
    .bind(account_id)
    .bind(account_id)
    .bind(account_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

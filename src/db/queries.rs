//! Read-only accessors behind the HTTP API.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::SECS_PER_DAY;
use crate::db::models::{AccountProfileRow, DashboardRow, MarketAggregateRow, TradeRow};
use crate::error::{AppError, Result};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

/// Trades returned alongside an account profile.
pub const ACCOUNT_TRADE_HISTORY: i64 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSort {
    #[default]
    Time,
    Size,
    ZScore,
    Win,
}

impl TradeSort {
    fn order_by(self) -> &'static str {
        match self {
            TradeSort::Time => "timestamp DESC, id DESC",
            TradeSort::Size => "size_usd DESC, id DESC",
            TradeSort::ZScore => "z_score DESC NULLS LAST, id DESC",
            TradeSort::Win => "is_win DESC NULLS LAST, pnl_usd DESC NULLS LAST, id DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSort {
    #[default]
    Suspicion,
    Volatility,
    Volume,
    Flagged,
}

impl MarketSort {
    fn order_by(self) -> &'static str {
        match self {
            MarketSort::Suspicion => "suspicion_score DESC, market_id",
            MarketSort::Volatility => "volatility_score DESC, market_id",
            MarketSort::Volume => "total_volume DESC, market_id",
            MarketSort::Flagged => "flagged_trades DESC, market_id",
        }
    }
}

/// Clamp a caller-supplied page to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub min_size: Option<f64>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub market_id: Option<String>,
    pub account_id: Option<String>,
    pub flagged_only: bool,
    pub sort: TradeSort,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub profile: AccountProfileRow,
    pub win_rate: f64,
    pub trades: Vec<TradeRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub tracked_accounts: i64,
    pub flagged_today: i64,
    pub total_trades: i64,
    pub avg_insider_score: f64,
    pub volume_24h: f64,
    pub flagged_pnl: f64,
    /// Percent of settled flagged trades that won.
    pub flagged_win_rate: f64,
}

/// Profiles with `insider_score >= min_score`, highest score first.
pub async fn list_accounts(pool: &SqlitePool, min_score: f64, page: Page) -> Result<Vec<AccountProfileRow>> {
    let rows = sqlx::query_as(
        r#"
        SELECT * FROM account_profiles
        WHERE insider_score >= ?
        ORDER BY insider_score DESC, account_id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(min_score)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_trades(pool: &SqlitePool, filter: &TradeFilter, page: Page) -> Result<Vec<TradeRow>> {
    // ORDER BY comes from a closed enum, never from caller text.
    let sql = format!(
        r#"
        SELECT * FROM trades
        WHERE (? IS NULL OR size_usd >= ?)
          AND (? IS NULL OR timestamp >= ?)
          AND (? IS NULL OR timestamp <= ?)
          AND (? IS NULL OR market_id = ?)
          AND (? IS NULL OR account_id = ?)
          AND (? = 0 OR is_flagged)
        ORDER BY {}
        LIMIT ? OFFSET ?
        "#,
        filter.sort.order_by()
    );

    let rows = sqlx::query_as(&sql)
        .bind(filter.min_size)
        .bind(filter.min_size)
        .bind(filter.since)
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.until)
        .bind(filter.market_id.as_deref())
        .bind(filter.market_id.as_deref())
        .bind(filter.account_id.as_deref())
        .bind(filter.account_id.as_deref())
        .bind(filter.flagged_only)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Profile plus most recent trades. `NotFound` for an unknown account.
pub async fn account_detail(pool: &SqlitePool, account_id: &str) -> Result<AccountDetail> {
    let profile: Option<AccountProfileRow> =
        sqlx::query_as("SELECT * FROM account_profiles WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(pool)
            .await?;
    let profile = profile.ok_or_else(|| AppError::NotFound(format!("account {account_id}")))?;

    let filter = TradeFilter {
        account_id: Some(account_id.to_string()),
        ..TradeFilter::default()
    };
    let trades = list_trades(pool, &filter, Page { limit: ACCOUNT_TRADE_HISTORY, offset: 0 }).await?;

    Ok(AccountDetail {
        win_rate: profile.win_rate(),
        profile,
        trades,
    })
}

pub async fn list_markets(
    pool: &SqlitePool,
    category: Option<&str>,
    sort: MarketSort,
    page: Page,
) -> Result<Vec<MarketAggregateRow>> {
    let sql = format!(
        r#"
        SELECT * FROM market_aggregates
        WHERE (? IS NULL OR category = ?)
        ORDER BY {}
        LIMIT ? OFFSET ?
        "#,
        sort.order_by()
    );

    let category = category.map(|c| c.trim().to_ascii_lowercase());
    let rows = sqlx::query_as(&sql)
        .bind(category.as_deref())
        .bind(category.as_deref())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Dashboard counters. "Today" starts at UTC midnight before `now`.
pub async fn dashboard(pool: &SqlitePool, now: i64) -> Result<DashboardStats> {
    let day_start = now - now.rem_euclid(SECS_PER_DAY);
    let since_24h = now - SECS_PER_DAY;

    let row: DashboardRow = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM account_profiles) AS tracked_accounts,
            (SELECT COUNT(*) FROM trades WHERE is_flagged AND timestamp >= ?) AS flagged_today,
            (SELECT COUNT(*) FROM trades) AS total_trades,
            (SELECT CAST(AVG(insider_score) AS REAL) FROM account_profiles) AS avg_insider_score,
            (SELECT CAST(COALESCE(SUM(size_usd), 0) AS REAL) FROM trades WHERE timestamp >= ?) AS volume_24h,
            (SELECT CAST(COALESCE(SUM(pnl_usd), 0) AS REAL) FROM trades
                WHERE is_flagged AND pnl_usd IS NOT NULL) AS flagged_pnl,
            (SELECT COUNT(*) FROM trades WHERE is_flagged AND is_win IS NOT NULL) AS flagged_settled,
            (SELECT COUNT(*) FROM trades WHERE is_flagged AND is_win = 1) AS flagged_wins
        "#,
    )
    .bind(day_start)
    .bind(since_24h)
    .fetch_one(pool)
    .await?;

    let flagged_win_rate = if row.flagged_settled > 0 {
        row.flagged_wins as f64 / row.flagged_settled as f64 * 100.0
    } else {
        0.0
    };

    Ok(DashboardStats {
        tracked_accounts: row.tracked_accounts,
        flagged_today: row.flagged_today,
        total_trades: row.total_trades,
        avg_insider_score: row.avg_insider_score.unwrap_or(0.0),
        volume_24h: row.volume_24h,
        flagged_pnl: row.flagged_pnl,
        flagged_win_rate,
    })
}

/// Database row types matching migrations/0001_init.sql.
/// Used by sqlx for typed queries and serialized as-is by the API.
use serde::Serialize;

use crate::scorer::ScoreInputs;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub account_id: String,
    pub market_id: String,
    pub tx_ref: String,
    pub market_name: String,
    pub size_usd: f64,
    pub side: Option<String>,
    pub outcome: Option<String>,
    pub price: Option<f64>,
    pub timestamp: i64,
    pub ingested_at: i64,
    pub z_score: Option<f64>,
    pub is_flagged: bool,
    pub is_win: Option<bool>,
    pub pnl_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountProfileRow {
    pub account_id: String,
    pub total_trades: i64,
    pub mean_size: f64,
    pub std_size: f64,
    pub max_size: f64,
    pub total_volume: f64,
    pub flagged_trades_count: i64,
    pub flagged_z_sum: f64,
    pub recent_trades_count: i64,
    pub recent_flagged_count: i64,
    pub insider_score: f64,
    pub resolved_trades: i64,
    pub winning_trades: i64,
    pub total_pnl: f64,
    pub last_updated: i64,
}

impl AccountProfileRow {
    /// The counters the stored `insider_score` was computed from.
    pub fn score_inputs(&self) -> ScoreInputs {
        ScoreInputs::from_counters(
            self.total_trades.max(0) as u64,
            self.flagged_trades_count.max(0) as u64,
            self.flagged_z_sum,
            self.recent_trades_count.max(0) as u64,
            self.recent_flagged_count.max(0) as u64,
        )
    }

    /// Percent of settled trades that won.
    pub fn win_rate(&self) -> f64 {
        if self.resolved_trades > 0 {
            self.winning_trades as f64 / self.resolved_trades as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MarketAggregateRow {
    pub market_id: String,
    pub market_name: String,
    pub category: String,
    pub total_trades: i64,
    pub flagged_trades: i64,
    pub unique_accounts: i64,
    pub total_volume: f64,
    pub yes_price: Option<f64>,
    pub no_price: Option<f64>,
    pub price_change_24h: f64,
    pub volatility_score: f64,
    pub suspicion_score: f64,
    pub resolved: bool,
    pub winning_outcome: Option<String>,
    pub resolved_at: Option<i64>,
    pub updated_at: i64,
}

/// Full-history counters for one account, read inside the ingest transaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountTotalsRow {
    pub total_trades: i64,
    pub total_volume: f64,
    pub max_size: f64,
    pub flagged_count: i64,
    pub flagged_z_sum: f64,
    pub recent_total: i64,
    pub recent_flagged: i64,
}

/// Count/volume totals for one market.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketTotalsRow {
    pub total_trades: i64,
    pub flagged_trades: i64,
    pub unique_accounts: i64,
    pub total_volume: f64,
}

/// Columns needed to settle one trade.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnsettledTradeRow {
    pub id: i64,
    pub account_id: String,
    pub size_usd: f64,
    pub side: Option<String>,
    pub outcome: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DashboardRow {
    pub tracked_accounts: i64,
    pub flagged_today: i64,
    pub total_trades: i64,
    pub avg_insider_score: Option<f64>,
    pub volume_24h: f64,
    pub flagged_pnl: f64,
    pub flagged_settled: i64,
    pub flagged_wins: i64,
}

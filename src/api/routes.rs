use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::db::models::{AccountProfileRow, MarketAggregateRow, TradeRow};
use crate::db::queries::{self, AccountDetail, DashboardStats, MarketSort, Page, TradeFilter, TradeSort};
use crate::error::AppError;
use crate::types::now_secs;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/accounts", get(get_accounts))
        .route("/accounts/:id", get(get_account))
        .route("/trades", get(get_trades))
        .route("/markets", get(get_markets))
        .route("/stats/summary", get(get_stats_summary))
        .route("/stats/latency", get(get_stats_latency))
        .route("/health", get(get_health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AccountsQuery {
    pub min_score: Option<f64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct TradesQuery {
    pub min_size: Option<f64>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub market: Option<String>,
    pub account: Option<String>,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub sort: TradeSort,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct MarketsQuery {
    pub category: Option<String>,
    #[serde(default)]
    pub sort: MarketSort,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_accounts(
    State(state): State<ApiState>,
    Query(params): Query<AccountsQuery>,
) -> Result<Json<Vec<AccountProfileRow>>, AppError> {
    let page = Page::new(params.limit, params.offset);
    let rows = queries::list_accounts(&state.pool, params.min_score.unwrap_or(0.0), page).await?;
    Ok(Json(rows))
}

async fn get_account(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountDetail>, AppError> {
    Ok(Json(queries::account_detail(&state.pool, &account_id).await?))
}

async fn get_trades(
    State(state): State<ApiState>,
    Query(params): Query<TradesQuery>,
) -> Result<Json<Vec<TradeRow>>, AppError> {
    let filter = TradeFilter {
        min_size: params.min_size,
        since: params.since,
        until: params.until,
        market_id: params.market,
        account_id: params.account,
        flagged_only: params.flagged,
        sort: params.sort,
    };
    let rows = queries::list_trades(&state.pool, &filter, Page::new(params.limit, params.offset)).await?;
    Ok(Json(rows))
}

async fn get_markets(
    State(state): State<ApiState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<MarketAggregateRow>>, AppError> {
    let rows = queries::list_markets(
        &state.pool,
        params.category.as_deref(),
        params.sort,
        Page::new(params.limit, params.offset),
    )
    .await?;
    Ok(Json(rows))
}

async fn get_stats_summary(State(state): State<ApiState>) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(queries::dashboard(&state.pool, now_secs()).await?))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

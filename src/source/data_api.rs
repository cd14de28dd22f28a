use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::source::{RawTrade, ResolutionSource, TradeSource};
use crate::types::ResolutionSignal;

/// An outcome priced at or above this on a closed market is the winner.
const WINNER_PRICE: f64 = 0.99;

/// Live Polymarket collaborator: recent trades from the Data API, market
/// settlement from the Gamma API.
pub struct PolymarketClient {
    client: reqwest::Client,
    data_api_url: String,
    gamma_api_url: String,
}

impl PolymarketClient {
    pub fn new(data_api_url: &str, gamma_api_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            data_api_url: data_api_url.trim_end_matches('/').to_string(),
            gamma_api_url: gamma_api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Source(format!("{url} returned {status}")));
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl TradeSource for PolymarketClient {
    fn name(&self) -> &str {
        "data-api"
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<RawTrade>> {
        let url = format!("{}/trades?limit={}", self.data_api_url, limit);
        let resp = self.get_json(&url).await?;
        let items = resp
            .as_array()
            .ok_or_else(|| AppError::Source("trades response is not an array".to_string()))?;
        debug!(count = items.len(), "Fetched trades from Data API");
        Ok(items.iter().map(parse_trade).collect())
    }
}

#[async_trait]
impl ResolutionSource for PolymarketClient {
    fn name(&self) -> &str {
        "gamma-api"
    }

    async fn check(&self, market_id: &str) -> Result<ResolutionSignal> {
        let url = format!("{}/markets?condition_ids={}", self.gamma_api_url, market_id);
        let resp = self.get_json(&url).await?;
        let market = match &resp {
            serde_json::Value::Array(items) => items.first(),
            obj @ serde_json::Value::Object(_) => Some(obj),
            _ => None,
        };
        match market {
            Some(m) => Ok(parse_resolution(m)),
            None => {
                debug!(market_id, "Gamma has no record of market");
                Ok(ResolutionSignal::unresolved())
            }
        }
    }
}

/// Map one Data API trade object. Missing or unreadable fields stay `None`
/// and are rejected by [`RawTrade::validate`].
pub fn parse_trade(v: &serde_json::Value) -> RawTrade {
    let price = number(v, "price");
    let shares = number(v, "size");
    let size_usd = number(v, "usdcSize").or_else(|| match (shares, price) {
        (Some(s), Some(p)) => Some(s * p),
        _ => None,
    });

    RawTrade {
        account_id: string(v, "proxyWallet"),
        market_id: string(v, "conditionId"),
        market_name: string(v, "title"),
        tx_ref: string(v, "transactionHash"),
        size_usd,
        side: string(v, "side"),
        outcome: string(v, "outcome"),
        price,
        timestamp: number(v, "timestamp").map(|t| t as i64),
    }
}

/// A market is settled once Gamma reports it closed and one outcome trades
/// at (or next to) 1.
pub fn parse_resolution(v: &serde_json::Value) -> ResolutionSignal {
    let closed = v.get("closed").and_then(|c| c.as_bool()).unwrap_or(false);
    if !closed {
        return ResolutionSignal::unresolved();
    }

    let outcomes: Vec<String> = encoded_list(v, "outcomes");
    let prices: Vec<f64> = encoded_list::<serde_json::Value>(v, "outcomePrices")
        .iter()
        .filter_map(as_f64)
        .collect();

    let winner = outcomes
        .iter()
        .zip(prices.iter())
        .find(|(_, p)| **p >= WINNER_PRICE)
        .map(|(o, _)| o.clone());

    ResolutionSignal {
        resolved: true,
        winning_outcome: winner,
    }
}

fn string(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key).and_then(|s| s.as_str()).map(str::to_string)
}

fn number(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key).and_then(as_f64)
}

fn as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Gamma ships list fields as JSON-encoded strings (`"[\"Yes\", \"No\"]"`).
fn encoded_list<T: serde::de::DeserializeOwned>(v: &serde_json::Value, key: &str) -> Vec<T> {
    match v.get(key) {
        Some(serde_json::Value::String(s)) => serde_json::from_str(s).unwrap_or_default(),
        Some(arr @ serde_json::Value::Array(_)) => serde_json::from_value(arr.clone()).unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub mod data_api;
pub mod mock;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::types::{NewTrade, ResolutionSignal, Side};

pub use data_api::PolymarketClient;
pub use mock::{MockResolutionSource, MockTradeSource};

/// Fallback display name when a record carries none.
const UNKNOWN_MARKET: &str = "Unknown Market";

/// Millisecond timestamps are larger than any plausible seconds value.
const MILLIS_CUTOFF: i64 = 100_000_000_000;

/// A trade record as delivered by a source, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTrade {
    pub account_id: Option<String>,
    pub market_id: Option<String>,
    pub market_name: Option<String>,
    pub tx_ref: Option<String>,
    /// USD notional.
    pub size_usd: Option<f64>,
    pub side: Option<String>,
    pub outcome: Option<String>,
    pub price: Option<f64>,
    /// Unix seconds or milliseconds.
    pub timestamp: Option<i64>,
}

impl RawTrade {
    /// Check required fields and normalise the record.
    pub fn validate(self) -> Result<NewTrade> {
        let account_id = required(self.account_id, "account")?;
        let market_id = required(self.market_id, "market")?;
        let tx_ref = required(self.tx_ref, "transaction reference")?;

        let size_usd = match self.size_usd {
            Some(s) if s.is_finite() && s > 0.0 => s,
            other => return Err(AppError::MalformedRecord(format!("size {other:?} for {tx_ref}"))),
        };
        let timestamp = match self.timestamp {
            Some(ts) if ts >= MILLIS_CUTOFF => ts / 1000,
            Some(ts) if ts > 0 => ts,
            other => return Err(AppError::MalformedRecord(format!("timestamp {other:?} for {tx_ref}"))),
        };
        let price = match self.price {
            None => None,
            Some(p) if p.is_finite() && (0.0..=1.0).contains(&p) => Some(p),
            Some(p) => return Err(AppError::MalformedRecord(format!("price {p} for {tx_ref}"))),
        };

        Ok(NewTrade {
            account_id,
            market_id,
            market_name: self
                .market_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| UNKNOWN_MARKET.to_string()),
            tx_ref,
            size_usd,
            side: self.side.as_deref().and_then(Side::parse),
            outcome: self.outcome.map(|o| o.trim().to_string()).filter(|o| !o.is_empty()),
            price,
            timestamp,
        })
    }
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::MalformedRecord(format!("missing {what}")))
}

/// Where recent trades come from. Delivery is at-least-once: records may
/// repeat across calls and arrive in any order.
#[async_trait]
pub trait TradeSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<RawTrade>>;
}

/// Answers whether a market has settled and which outcome won.
#[async_trait]
pub trait ResolutionSource: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, market_id: &str) -> Result<ResolutionSignal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawTrade {
        RawTrade {
            account_id: Some("0xabc".into()),
            market_id: Some("0xmkt".into()),
            market_name: Some("  Will it rain in NYC?  ".into()),
            tx_ref: Some("0xtx".into()),
            size_usd: Some(120.0),
            side: Some("BUY".into()),
            outcome: Some("Yes".into()),
            price: Some(0.35),
            timestamp: Some(1_700_000_000),
        }
    }

    #[test]
    fn valid_record_is_normalised() {
        let t = raw().validate().unwrap();
        assert_eq!(t.market_name, "Will it rain in NYC?");
        assert_eq!(t.side, Some(Side::Buy));
        assert_eq!(t.timestamp, 1_700_000_000);
    }

    #[test]
    fn millisecond_timestamps_are_scaled() {
        let t = RawTrade { timestamp: Some(1_700_000_000_123), ..raw() }.validate().unwrap();
        assert_eq!(t.timestamp, 1_700_000_000);
    }

    #[test]
    fn missing_or_bad_fields_are_malformed() {
        let cases = [
            RawTrade { account_id: None, ..raw() },
            RawTrade { market_id: Some("   ".into()), ..raw() },
            RawTrade { tx_ref: None, ..raw() },
            RawTrade { size_usd: Some(f64::NAN), ..raw() },
            RawTrade { size_usd: Some(-3.0), ..raw() },
            RawTrade { timestamp: None, ..raw() },
            RawTrade { price: Some(1.7), ..raw() },
        ];
        for case in cases {
            assert!(matches!(case.validate(), Err(AppError::MalformedRecord(_))));
        }
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let t = RawTrade { market_name: None, side: None, outcome: None, price: None, ..raw() }
            .validate()
            .unwrap();
        assert_eq!(t.market_name, UNKNOWN_MARKET);
        assert!(t.side.is_none());
        assert!(t.outcome.is_none());
        assert!(t.price.is_none());
    }
}

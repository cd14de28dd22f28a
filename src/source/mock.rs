use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{AppError, Result};
use crate::source::{RawTrade, ResolutionSource, TradeSource};
use crate::types::{now_secs, ResolutionSignal};

const MARKETS: &[(&str, &str)] = &[
    ("0xmock-btc-100k", "Will Bitcoin close above $100k on Friday?"),
    ("0xmock-fed-cut", "Will the Fed cut interest rates in December?"),
    ("0xmock-nba-finals", "Will the Celtics win the NBA Finals?"),
    ("0xmock-election", "Who will win the 2028 presidential election?"),
    ("0xmock-oscars", "Will Oppenheimer win the Oscar for Best Picture?"),
    ("0xmock-hurricane", "Will a category 5 hurricane make landfall in Florida?"),
    ("0xmock-spacex", "Will SpaceX land Starship on Mars before 2030?"),
    ("0xmock-eth-etf", "Will an ETH ETF be approved this quarter?"),
];

const ACCOUNTS: usize = 40;
/// One in this many accounts occasionally places outsized bets.
const INSIDER_EVERY: usize = 8;
const INSIDER_BET_PROBABILITY: f64 = 0.04;
/// Share of the previous batch delivered again, as a real feed may.
const REPLAY_FRACTION: f64 = 0.2;

struct MockState {
    rng: StdRng,
    seq: u64,
    last_batch: Vec<RawTrade>,
}

/// Synthetic trade feed for running without network access.
pub struct MockTradeSource {
    state: Mutex<MockState>,
    batch_size: usize,
}

impl MockTradeSource {
    pub fn new(batch_size: usize) -> Self {
        Self::with_rng(StdRng::from_entropy(), batch_size)
    }

    #[cfg(test)]
    pub fn seeded(seed: u64, batch_size: usize) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), batch_size)
    }

    fn with_rng(rng: StdRng, batch_size: usize) -> Self {
        Self {
            state: Mutex::new(MockState { rng, seq: 0, last_batch: Vec::new() }),
            batch_size,
        }
    }
}

fn account_id(index: usize) -> String {
    format!("0xmock{index:036x}")
}

/// Typical bet for an account; spreads accounts across small and large traders.
fn base_size(index: usize) -> f64 {
    100.0 + (index % 10) as f64 * 150.0
}

fn generate(state: &mut MockState, count: usize, now: i64) -> Vec<RawTrade> {
    let mut trades = Vec::with_capacity(count);
    for _ in 0..count {
        let rng = &mut state.rng;
        let account = rng.gen_range(0..ACCOUNTS);
        let (market_id, market_name) = MARKETS[rng.gen_range(0..MARKETS.len())];

        let mut size = base_size(account) * rng.gen_range(0.7..1.3);
        if account % INSIDER_EVERY == 0 && rng.gen_bool(INSIDER_BET_PROBABILITY) {
            size *= rng.gen_range(20.0..60.0);
        }
        let outcome = if rng.gen_bool(0.5) { "Yes" } else { "No" };
        let side = if rng.gen_bool(0.85) { "BUY" } else { "SELL" };
        let price: f64 = rng.gen_range(0.05..0.95);
        let timestamp = now - rng.gen_range(0..60);

        state.seq += 1;
        trades.push(RawTrade {
            account_id: Some(account_id(account)),
            market_id: Some(market_id.to_string()),
            market_name: Some(market_name.to_string()),
            tx_ref: Some(format!("0xmocktx{:016x}", state.seq)),
            size_usd: Some((size * 100.0).round() / 100.0),
            side: Some(side.to_string()),
            outcome: Some(outcome.to_string()),
            price: Some((price * 100.0).round() / 100.0),
            timestamp: Some(timestamp),
        });
    }
    trades
}

#[async_trait]
impl TradeSource for MockTradeSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<RawTrade>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AppError::Source("mock trade source poisoned".to_string()))?;

        let count = self.batch_size.min(limit);
        let replay = ((state.last_batch.len() as f64) * REPLAY_FRACTION) as usize;
        let mut batch: Vec<RawTrade> = state.last_batch.iter().take(replay).cloned().collect();
        let fresh = generate(&mut state, count.saturating_sub(batch.len()), now_secs());
        batch.extend(fresh.iter().cloned());
        state.last_batch = fresh;
        Ok(batch)
    }
}

/// Settles each mock market with a small probability per check.
pub struct MockResolutionSource {
    rng: Mutex<StdRng>,
    resolve_probability: f64,
}

impl MockResolutionSource {
    pub fn new(resolve_probability: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            resolve_probability: resolve_probability.clamp(0.0, 1.0),
        }
    }

    #[cfg(test)]
    pub fn seeded(seed: u64, resolve_probability: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            resolve_probability: resolve_probability.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl ResolutionSource for MockResolutionSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn check(&self, _market_id: &str) -> Result<ResolutionSignal> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| AppError::Source("mock resolution source poisoned".to_string()))?;
        if !rng.gen_bool(self.resolve_probability) {
            return Ok(ResolutionSignal::unresolved());
        }
        let winner = if rng.gen_bool(0.5) { "Yes" } else { "No" };
        Ok(ResolutionSignal::resolved(winner))
    }
}

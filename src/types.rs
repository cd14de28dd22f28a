use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trade side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Upstream feeds send `BUY`/`SELL` in any case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" => Some(Side::Buy),
            "sell" | "s" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Sports,
    Politics,
    Crypto,
    Economics,
    Entertainment,
    Science,
    Weather,
    Other,
}

/// Keyword table, checked in order; first hit wins.
const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Sports,
        &[
            "nba", "nfl", "basketball", "football", "super bowl", "world cup", "olympics",
            "soccer", "tennis", "formula 1", "ufc", "mvp", "finals",
        ],
    ),
    (
        Category::Politics,
        &[
            "president", "election", "senate", "congress", "democrat", "republican",
            "governor", "parliament", "prime minister",
        ],
    ),
    (
        Category::Crypto,
        &["bitcoin", "ethereum", "crypto", "btc", "eth", "solana", "doge", "blockchain"],
    ),
    (
        Category::Economics,
        &["fed", "interest rate", "inflation", "cpi", "gdp", "recession", "stock", "ipo", "tesla"],
    ),
    (
        Category::Entertainment,
        &["oscar", "emmy", "grammy", "movie", "album", "box office"],
    ),
    (
        Category::Science,
        &["covid", "vaccine", "mars", "spacex", "nasa"],
    ),
    (
        Category::Weather,
        &["temperature", "hurricane", "rainfall", "snow", "climate"],
    ),
];

impl Category {
    /// Classify a market from its display name. Keywords match whole words.
    pub fn from_market_name(name: &str) -> Self {
        let words: Vec<String> = name
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        let haystack = format!(" {} ", words.join(" "));
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(&format!(" {k} "))))
            .map(|(category, _)| *category)
            .unwrap_or(Category::Other)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Sports => "sports",
            Category::Politics => "politics",
            Category::Crypto => "crypto",
            Category::Economics => "economics",
            Category::Entertainment => "entertainment",
            Category::Science => "science",
            Category::Weather => "weather",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Validated trade, ready for reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub account_id: String,
    pub market_id: String,
    pub market_name: String,
    /// Upstream transaction reference; third part of the natural key.
    pub tx_ref: String,
    pub size_usd: f64,
    pub side: Option<Side>,
    pub outcome: Option<String>,
    pub price: Option<f64>,
    /// Unix seconds as reported by the source.
    pub timestamp: i64,
}

impl NewTrade {
    pub fn natural_key(&self) -> (&str, &str, &str) {
        (&self.account_id, &self.market_id, &self.tx_ref)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Answer from the resolution collaborator for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSignal {
    pub resolved: bool,
    pub winning_outcome: Option<String>,
}

impl ResolutionSignal {
    pub fn unresolved() -> Self {
        Self { resolved: false, winning_outcome: None }
    }

    pub fn resolved(winning_outcome: impl Into<String>) -> Self {
        Self { resolved: true, winning_outcome: Some(winning_outcome.into()) }
    }

    /// Winner to settle against, only once the market is final and the
    /// winner is known.
    pub fn settleable_winner(&self) -> Option<&str> {
        if self.resolved {
            self.winning_outcome.as_deref().filter(|w| !w.trim().is_empty())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Poll cycle bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Fetching,
    Reconciling,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CyclePhase::Fetching => write!(f, "FETCHING"),
            CyclePhase::Reconciling => write!(f, "RECONCILING"),
        }
    }
}

/// Per-cycle counters for one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub below_minimum: usize,
    pub flagged: usize,
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// A Yes buy at 0.40 in a single shared market.
#[cfg(test)]
pub fn test_trade(account_id: &str, tx_ref: &str, size_usd: f64, timestamp: i64) -> NewTrade {
    NewTrade {
        account_id: account_id.to_string(),
        market_id: "0xmarket".to_string(),
        market_name: "Will BTC close above 100k?".to_string(),
        tx_ref: tx_ref.to_string(),
        size_usd,
        side: Some(Side::Buy),
        outcome: Some("Yes".to_string()),
        price: Some(0.4),
        timestamp,
    }
}

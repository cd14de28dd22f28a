pub mod insider;
pub mod market_scorer;
pub mod suspicion;

pub use insider::ScoreInputs;
pub use market_scorer::MarketAggregator;
pub use suspicion::SuspicionPolicy;

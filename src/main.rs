mod api;
mod config;
mod db;
mod detector;
mod error;
mod ingestor;
mod resolution;
mod scorer;
mod source;
mod types;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::TradeWriter;
use crate::error::Result;
use crate::ingestor::Ingestor;
use crate::resolution::ResolutionSweeper;
use crate::scorer::MarketAggregator;
use crate::source::{MockResolutionSource, MockTradeSource, PolymarketClient, ResolutionSource, TradeSource};

/// Trades generated per mock poll.
const MOCK_BATCH_SIZE: usize = 25;
/// Chance a mock market settles on any given check.
const MOCK_RESOLVE_PROBABILITY: f64 = 0.05;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Collaborators ---
    let trade_source: Arc<dyn TradeSource>;
    let resolution_source: Arc<dyn ResolutionSource>;
    if cfg.mock_mode {
        info!("MOCK_MODE on: using synthetic trade and resolution sources");
        trade_source = Arc::new(MockTradeSource::new(MOCK_BATCH_SIZE));
        resolution_source = Arc::new(MockResolutionSource::new(MOCK_RESOLVE_PROBABILITY));
    } else {
        let client = Arc::new(PolymarketClient::new(
            &cfg.data_api_url,
            &cfg.gamma_api_url,
            cfg.fetch_timeout,
        )?);
        info!(data_api = %cfg.data_api_url, gamma_api = %cfg.gamma_api_url, "Using live Polymarket sources");
        trade_source = client.clone();
        resolution_source = client;
    }

    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Spawn tasks ---

    // Ingestion loop (every POLL_INTERVAL_SECS)
    let ingestor = Ingestor::new(
        &cfg,
        trade_source,
        TradeWriter::new(pool.clone()),
        Arc::clone(&health),
        Arc::clone(&latency),
    );
    tokio::spawn(async move { ingestor.run().await });

    // Market aggregator (every AGGREGATE_INTERVAL_SECS)
    let aggregator = MarketAggregator::new(
        pool.clone(),
        cfg.suspicion,
        cfg.aggregate_interval,
        Arc::clone(&health),
    );
    tokio::spawn(async move { aggregator.run().await });

    // Resolution sweeper (every RESOLUTION_INTERVAL_SECS)
    let sweeper = ResolutionSweeper::new(&cfg, pool.clone(), resolution_source, Arc::clone(&health));
    tokio::spawn(async move { sweeper.run().await });

    // HTTP API server
    let api_state = ApiState { pool: pool.clone(), health, latency };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

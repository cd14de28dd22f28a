use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::scorer::SuspicionPolicy;

pub const DATA_API_URL: &str = "https://data-api.polymarket.com";
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Ingestion poll interval (seconds).
pub const POLL_INTERVAL_SECS: u64 = 30;

/// Market aggregation interval (seconds).
pub const AGGREGATE_INTERVAL_SECS: u64 = 30;

/// Resolution sweep interval (seconds).
pub const RESOLUTION_INTERVAL_SECS: u64 = 3600;

/// Upper bound on any single call to the trade or resolution source (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 10;

/// Trades requested from the source per poll.
pub const TRADE_FETCH_LIMIT: usize = 500;

/// Trades below this notional are dropped at ingestion (dust and bot fills).
pub const MIN_TRADE_SIZE_USD: f64 = 50.0;

/// |z| above this flags a trade.
pub const Z_SCORE_THRESHOLD: f64 = 3.0;

/// Number of most recent trades per account that feed the baseline statistics.
pub const STATS_WINDOW_SIZE: usize = 100;

/// Trailing window for the recency component of the insider score (days).
pub const RECENT_WINDOW_DAYS: i64 = 7;
pub const MAX_RECENT_WINDOW_DAYS: i64 = 3_650;

/// Markets checked per resolution sweep.
pub const RESOLUTION_BATCH_SIZE: usize = 50;

/// How long a "still unresolved" answer is reused before asking upstream again.
pub const RESOLUTION_CACHE_TTL_SECS: u64 = 60;

/// Concurrent resolution lookups in flight per sweep.
pub const RESOLUTION_CONCURRENCY: usize = 4;

pub const SECS_PER_DAY: i64 = 86_400;

/// Thresholds and windows used by the per-trade detection path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionPolicy {
    pub z_score_threshold: f64,
    pub window_size: usize,
    pub recent_window_days: i64,
}

impl DetectionPolicy {
    pub fn recent_window_secs(&self) -> i64 {
        self.recent_window_days * SECS_PER_DAY
    }
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            z_score_threshold: Z_SCORE_THRESHOLD,
            window_size: STATS_WINDOW_SIZE,
            recent_window_days: RECENT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub data_api_url: String,
    pub gamma_api_url: String,
    /// Use the built-in synthetic trade and resolution sources (MOCK_MODE)
    pub mock_mode: bool,
    pub poll_interval: Duration,
    pub aggregate_interval: Duration,
    pub resolution_interval: Duration,
    pub fetch_timeout: Duration,
    pub trade_fetch_limit: usize,
    /// Minimum notional in USD for a trade to be ingested (MIN_TRADE_SIZE_USD)
    pub min_trade_size_usd: f64,
    pub detection: DetectionPolicy,
    pub suspicion: SuspicionPolicy,
    pub resolution_batch_size: usize,
    pub resolution_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env file is the normal case in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup so tests never touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SuspicionPolicy::default();

        let z_score_threshold: f64 = parse_or(&lookup, "Z_SCORE_THRESHOLD", Z_SCORE_THRESHOLD)?;
        if z_score_threshold.is_nan() || z_score_threshold <= 0.0 {
            return Err(AppError::Config("Z_SCORE_THRESHOLD must be positive".to_string()));
        }
        let window_size: usize = parse_or(&lookup, "STATS_WINDOW_SIZE", STATS_WINDOW_SIZE)?;
        if window_size < 2 {
            return Err(AppError::Config("STATS_WINDOW_SIZE must be at least 2".to_string()));
        }

        let recent_window_days: i64 = parse_or(&lookup, "RECENT_WINDOW_DAYS", RECENT_WINDOW_DAYS)?;
        if !(1..=MAX_RECENT_WINDOW_DAYS).contains(&recent_window_days) {
            return Err(AppError::Config(format!(
                "RECENT_WINDOW_DAYS must be between 1 and {MAX_RECENT_WINDOW_DAYS}"
            )));
        }

        let suspicion = SuspicionPolicy {
            flagged_weight: parse_or(&lookup, "SUSPICION_FLAGGED_WEIGHT", defaults.flagged_weight)?,
            volatility_weight: parse_or(
                &lookup,
                "SUSPICION_VOLATILITY_WEIGHT",
                defaults.volatility_weight,
            )?,
            change_weight: defaults.change_weight,
            range_weight: defaults.range_weight,
            change_saturation_pct: parse_or(
                &lookup,
                "VOLATILITY_CHANGE_SATURATION_PCT",
                defaults.change_saturation_pct,
            )?,
            range_saturation: parse_or(
                &lookup,
                "VOLATILITY_RANGE_SATURATION",
                defaults.range_saturation,
            )?,
        };
        suspicion.validate()?;

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            db_path: lookup("DB_PATH").unwrap_or_else(|| "polyedge.db".to_string()),
            api_port: lookup("API_PORT")
                .unwrap_or_else(|| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            data_api_url: lookup("DATA_API_URL").unwrap_or_else(|| DATA_API_URL.to_string()),
            gamma_api_url: lookup("GAMMA_API_URL").unwrap_or_else(|| GAMMA_API_URL.to_string()),
            mock_mode: parse_bool_or(&lookup, "MOCK_MODE", true)?,
            poll_interval: secs(parse_or(&lookup, "POLL_INTERVAL_SECS", POLL_INTERVAL_SECS)?, "POLL_INTERVAL_SECS")?,
            aggregate_interval: secs(
                parse_or(&lookup, "AGGREGATE_INTERVAL_SECS", AGGREGATE_INTERVAL_SECS)?,
                "AGGREGATE_INTERVAL_SECS",
            )?,
            resolution_interval: secs(
                parse_or(&lookup, "RESOLUTION_INTERVAL_SECS", RESOLUTION_INTERVAL_SECS)?,
                "RESOLUTION_INTERVAL_SECS",
            )?,
            fetch_timeout: secs(parse_or(&lookup, "FETCH_TIMEOUT_SECS", FETCH_TIMEOUT_SECS)?, "FETCH_TIMEOUT_SECS")?,
            trade_fetch_limit: at_least_one(
                parse_or(&lookup, "TRADE_FETCH_LIMIT", TRADE_FETCH_LIMIT)?,
                "TRADE_FETCH_LIMIT",
            )?,
            min_trade_size_usd: parse_or(&lookup, "MIN_TRADE_SIZE_USD", MIN_TRADE_SIZE_USD)?,
            detection: DetectionPolicy {
                z_score_threshold,
                window_size,
                recent_window_days,
            },
            suspicion,
            resolution_batch_size: at_least_one(
                parse_or(&lookup, "RESOLUTION_BATCH_SIZE", RESOLUTION_BATCH_SIZE)?,
                "RESOLUTION_BATCH_SIZE",
            )?,
            resolution_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "RESOLUTION_CACHE_TTL_SECS",
                RESOLUTION_CACHE_TTL_SECS,
            )?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        _ => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(s) if s.is_empty() => Ok(default),
        Some(s) => match s.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Config(format!("{key} must be a boolean, got {s:?}"))),
        },
    }
}

fn at_least_one(value: usize, key: &str) -> Result<usize> {
    if value == 0 {
        return Err(AppError::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn secs(value: u64, key: &str) -> Result<Duration> {
    if value == 0 {
        return Err(AppError::Config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config_with(&[]).unwrap();
        assert!(cfg.mock_mode);
        assert_eq!(cfg.poll_interval, Duration::from_secs(POLL_INTERVAL_SECS));
        assert_eq!(cfg.detection, DetectionPolicy::default());
        assert_eq!(cfg.min_trade_size_usd, MIN_TRADE_SIZE_USD);
        assert_eq!(cfg.api_port, 8000);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config_with(&[
            ("MOCK_MODE", "false"),
            ("POLL_INTERVAL_SECS", "5"),
            ("Z_SCORE_THRESHOLD", "2.5"),
            ("STATS_WINDOW_SIZE", "20"),
            ("SUSPICION_FLAGGED_WEIGHT", "0.5"),
            ("SUSPICION_VOLATILITY_WEIGHT", "0.5"),
        ])
        .unwrap();
        assert!(!cfg.mock_mode);
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.detection.z_score_threshold, 2.5);
        assert_eq!(cfg.detection.window_size, 20);
        assert_eq!(cfg.suspicion.flagged_weight, 0.5);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            config_with(&[("Z_SCORE_THRESHOLD", "abc")]),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            config_with(&[("STATS_WINDOW_SIZE", "1")]),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            config_with(&[("POLL_INTERVAL_SECS", "0")]),
            Err(AppError::Config(_))
        ));
        assert!(matches!(config_with(&[("MOCK_MODE", "maybe")]), Err(AppError::Config(_))));
    }

    #[test]
    fn sizes_and_windows_must_be_positive() {
        for pairs in [
            [("RESOLUTION_BATCH_SIZE", "0")],
            [("TRADE_FETCH_LIMIT", "0")],
            [("RECENT_WINDOW_DAYS", "0")],
            [("RECENT_WINDOW_DAYS", "-3")],
            [("RECENT_WINDOW_DAYS", "9223372036854775807")],
        ] {
            assert!(matches!(config_with(&pairs), Err(AppError::Config(_))), "{pairs:?}");
        }

        let cfg = config_with(&[("RECENT_WINDOW_DAYS", "30"), ("RESOLUTION_BATCH_SIZE", "1")]).unwrap();
        assert_eq!(cfg.detection.recent_window_secs(), 30 * SECS_PER_DAY);
        assert_eq!(cfg.resolution_batch_size, 1);
    }
}

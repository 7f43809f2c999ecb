use std::str::FromStr;

use crate::error::{AppError, Result};

pub const SERVICE_NAME: &str = "Trade Discovery";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version tag written into every opportunity's metadata blob.
pub const ANALYSIS_VERSION: &str = "1.0";

/// Assets processed concurrently per batch. Batches run one after another.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Trailing window of daily bars requested per asset.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

/// How long to wait for a live last-trade quote before falling back to the last close.
pub const QUOTE_WAIT_MS: u64 = 1000;

/// Request timeout for the gateway HTTP client (seconds).
pub const GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Opportunities returned by `GET /assets/{symbol}`.
pub const RECENT_OPPORTUNITIES_LIMIT: i64 = 10;

/// Default page size for `GET /opportunities`.
pub const DEFAULT_PAGE_LIMIT: i64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Gateway host (IB_HOST)
    pub ib_host: String,
    /// Gateway port (IB_PORT)
    pub ib_port: u16,
    /// Session identifier reported in logs and provenance (IB_CLIENT_ID)
    pub ib_client_id: u32,
    /// "https" for the stock Client Portal gateway (IB_SCHEME)
    pub ib_scheme: String,
    /// The gateway ships with a self-signed certificate (IB_ACCEPT_INVALID_CERTS)
    pub ib_accept_invalid_certs: bool,
    /// Assets per concurrent batch (DISCOVERY_BATCH_SIZE)
    pub batch_size: usize,
    /// Daily bars to request per asset (DISCOVERY_LOOKBACK_DAYS)
    pub lookback_days: u32,
    /// Background discovery interval; None disables the scheduler (DISCOVERY_INTERVAL_SECS)
    pub discovery_interval_secs: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let batch_size: usize = parse_var("DISCOVERY_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(AppError::Config("DISCOVERY_BATCH_SIZE must be at least 1".to_string()));
        }

        let discovery_interval_secs = match std::env::var("DISCOVERY_INTERVAL_SECS") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().parse::<u64>().map_err(|_| {
                AppError::Config("DISCOVERY_INTERVAL_SECS must be a number of seconds".to_string())
            })?),
            _ => None,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "trade_discovery.db".to_string()),
            api_port: parse_var("API_PORT", 8000)?,
            ib_host: std::env::var("IB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            ib_port: parse_var("IB_PORT", 5000)?,
            ib_client_id: parse_var("IB_CLIENT_ID", 1)?,
            ib_scheme: std::env::var("IB_SCHEME").unwrap_or_else(|_| "https".to_string()),
            ib_accept_invalid_certs: parse_var("IB_ACCEPT_INVALID_CERTS", true)?,
            batch_size,
            lookback_days: parse_var("DISCOVERY_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?,
            discovery_interval_secs,
        })
    }

    /// Base URL of the gateway's REST API.
    pub fn gateway_base_url(&self) -> String {
        format!("{}://{}:{}/v1/api", self.ib_scheme, self.ib_host, self.ib_port)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_is_built_from_parts() {
        let cfg = Config {
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 8000,
            ib_host: "gw.local".to_string(),
            ib_port: 5001,
            ib_client_id: 7,
            ib_scheme: "https".to_string(),
            ib_accept_invalid_certs: true,
            batch_size: DEFAULT_BATCH_SIZE,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            discovery_interval_secs: None,
        };
        assert_eq!(cfg.gateway_base_url(), "https://gw.local:5001/v1/api");
    }

    #[test]
    fn parse_var_falls_back_to_default_when_unset() {
        let v: u16 = parse_var("TRADE_DISCOVERY_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(v, 42);
    }
}

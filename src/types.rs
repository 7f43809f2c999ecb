use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

pub const DEFAULT_ASSET_TYPE: &str = "STK";
pub const DEFAULT_EXCHANGE: &str = "SMART";

// ---------------------------------------------------------------------------
// Asset pool
// ---------------------------------------------------------------------------

/// A symbol under active monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub symbol: String,
    pub asset_type: String,
    pub exchange: String,
    pub is_active: bool,
    /// Schema-less screening filters.
    pub filters: Value,
    /// Schema-less descriptive metadata.
    pub metadata: Value,
    pub last_updated: DateTime<Utc>,
}

impl AssetEntry {
    pub fn new(symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            asset_type: DEFAULT_ASSET_TYPE.to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            is_active: true,
            filters: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
            last_updated: now,
        }
    }
}

/// One item of a `POST /asset-pool` body: a bare symbol or a full descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AssetInput {
    Symbol(String),
    Descriptor(AssetDescriptor),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetDescriptor {
    pub symbol: String,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default = "default_active", alias = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_active() -> bool {
    true
}

impl AssetInput {
    pub fn into_entry(self, now: DateTime<Utc>) -> Result<AssetEntry> {
        let descriptor = match self {
            AssetInput::Symbol(symbol) => {
                return normalize_symbol(&symbol).map(|s| AssetEntry::new(s, now));
            }
            AssetInput::Descriptor(d) => d,
        };

        let mut entry = AssetEntry::new(normalize_symbol(&descriptor.symbol)?, now);
        if let Some(asset_type) = descriptor.asset_type {
            entry.asset_type = asset_type;
        }
        if let Some(exchange) = descriptor.exchange {
            entry.exchange = exchange;
        }
        entry.is_active = descriptor.is_active;
        if let Some(filters) = descriptor.filters {
            entry.filters = filters;
        }
        if let Some(metadata) = descriptor.metadata {
            entry.metadata = metadata;
        }
        Ok(entry)
    }
}

fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim();
    if symbol.is_empty() {
        return Err(AppError::BadRequest("asset symbol must not be empty".to_string()));
    }
    Ok(symbol.to_string())
}

// ---------------------------------------------------------------------------
// Market data (transient)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataProvenance {
    pub source: String,
    pub timeframe: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Snapshot returned by a market data provider for one symbol.
/// Bars are ordered oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct MarketData {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub latest_price: f64,
    pub bars: Vec<Bar>,
    pub metadata: DataProvenance,
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// A scored, timestamped record for one asset. Written once per successful
/// analysis and never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    /// None until persisted.
    pub id: Option<i64>,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub market_state: i64,
    pub confidence: f64,
    /// Always within [0, 1].
    pub score: f64,
    /// Keys: rsi, macd, macd_signal, stoch_k, stoch_d.
    pub technical_metrics: Value,
    /// Keys: composite_signal, state_characteristics.
    pub active_inference_metrics: Value,
    /// Keys: volatility, trend_strength, volume, return_dispersion.
    pub risk_metrics: Value,
    /// Keys: analysis_version, asset_type, exchange.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_symbol_gets_defaults() {
        let input: AssetInput = serde_json::from_value(json!("AAPL")).unwrap();
        let entry = input.into_entry(Utc::now()).unwrap();
        assert_eq!(entry.symbol, "AAPL");
        assert_eq!(entry.asset_type, DEFAULT_ASSET_TYPE);
        assert_eq!(entry.exchange, DEFAULT_EXCHANGE);
        assert!(entry.is_active);
    }

    #[test]
    fn descriptor_overrides_defaults() {
        let input: AssetInput = serde_json::from_value(json!({
            "symbol": " ES ",
            "asset_type": "FUT",
            "exchange": "CME",
            "active": false,
            "filters": {"min_volume": 1000}
        }))
        .unwrap();
        let entry = input.into_entry(Utc::now()).unwrap();
        assert_eq!(entry.symbol, "ES");
        assert_eq!(entry.asset_type, "FUT");
        assert_eq!(entry.exchange, "CME");
        assert!(!entry.is_active);
        assert_eq!(entry.filters["min_volume"], 1000);
    }

    #[test]
    fn blank_symbol_is_rejected() {
        let input: AssetInput = serde_json::from_value(json!("   ")).unwrap();
        assert!(matches!(input.into_entry(Utc::now()), Err(AppError::BadRequest(_))));
    }
}

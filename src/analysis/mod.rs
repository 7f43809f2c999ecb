//! Market analysis seam: market-state identification, technical indicators and
//! a composite trading signal for one symbol.

pub mod indicators;
pub mod regime;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::types::MarketData;

pub use regime::RegimeAnalyzer;

/// Keys of the per-state characteristics mapping.
pub mod keys {
    pub const VOLATILITY: &str = "volatility";
    pub const TREND_STRENGTH: &str = "trend_strength";
    pub const VOLUME: &str = "volume";
    pub const RETURN_DISPERSION: &str = "return_dispersion";

    pub const ALL: [&str; 4] = [VOLATILITY, TREND_STRENGTH, VOLUME, RETURN_DISPERSION];
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("insufficient data for {symbol}: need at least {needed} bars, got {got}")]
    InsufficientData { symbol: String, needed: usize, got: usize },

    #[error("invalid market data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("analyzer output is missing {0}")]
    MissingOutput(&'static str),
}

/// Market state of the latest bar and what that state looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct StateInfo {
    pub state: i64,
    /// Expected keys: see [`keys`]. Values normalized into [0, 1].
    pub characteristics: BTreeMap<String, f64>,
    /// Latest signal confidence, in [0, 1].
    pub confidence: f64,
}

/// Per-bar signal series, aligned with the input bars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradingSignals {
    /// Aggregate directional conviction in [-1, 1].
    pub composite_signal: Vec<f64>,
    /// Agreement between the signal's components, in [0, 1].
    pub confidence: Vec<f64>,
}

/// Per-bar indicator series, aligned with the input bars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnicalIndicators {
    pub rsi: Vec<f64>,
    pub macd: Vec<f64>,
    pub macd_signal: Vec<f64>,
    pub stoch_k: Vec<f64>,
    pub stoch_d: Vec<f64>,
}

impl TechnicalIndicators {
    /// Latest value of every indicator, keyed for the technical metrics blob.
    pub fn latest_metrics(&self) -> Result<Value, AnalysisError> {
        let last = |series: &[f64], name: &'static str| {
            series.last().copied().ok_or(AnalysisError::MissingOutput(name))
        };
        Ok(json!({
            "rsi": last(&self.rsi, "rsi")?,
            "macd": last(&self.macd, "macd")?,
            "macd_signal": last(&self.macd_signal, "macd_signal")?,
            "stoch_k": last(&self.stoch_k, "stoch_k")?,
            "stoch_d": last(&self.stoch_d, "stoch_d")?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub state_info: StateInfo,
    pub signals: TradingSignals,
    pub indicators: TechnicalIndicators,
}

#[async_trait]
pub trait MarketAnalyzer: Send + Sync {
    async fn analyze(&self, symbol: &str, data: &MarketData) -> Result<Analysis, AnalysisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_metrics_reports_missing_series() {
        let mut ind = TechnicalIndicators {
            rsi: vec![40.0, 55.0],
            macd: vec![0.1],
            macd_signal: vec![0.05],
            stoch_k: vec![70.0],
            stoch_d: vec![],
        };
        assert!(matches!(ind.latest_metrics(), Err(AnalysisError::MissingOutput("stoch_d"))));

        ind.stoch_d.push(65.0);
        let m = ind.latest_metrics().unwrap();
        assert_eq!(m["rsi"], 55.0);
        assert_eq!(m["stoch_d"], 65.0);
    }
}

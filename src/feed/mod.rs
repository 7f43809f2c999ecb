//! Market data feed: the provider seam the discovery pipeline fetches through,
//! and the Interactive Brokers gateway adapter behind it.

pub mod gateway;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::MarketData;

pub use gateway::IbGatewayClient;

#[derive(Debug, Error)]
pub enum FeedError {
    /// The upstream session could not be established. Fatal to a discovery run.
    #[error("failed to connect to market data feed: {0}")]
    Connection(String),

    #[error("market data feed is not connected")]
    NotConnected,

    #[error("no contract found for symbol {0}")]
    UnknownSymbol(String),

    /// Per-symbol retrieval failure wrapping the upstream cause.
    #[error("error fetching market data for {symbol}: {source}")]
    Fetch {
        symbol: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl FeedError {
    pub fn fetch(symbol: &str, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        FeedError::Fetch {
            symbol: symbol.to_string(),
            source: source.into(),
        }
    }
}

/// Source of historical bars and a latest price for a symbol.
///
/// One session is opened per discovery run with [`connect`](Self::connect) and
/// closed with [`disconnect`](Self::disconnect); [`fetch`](Self::fetch) is
/// called concurrently for every asset of a batch in between.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn connect(&self) -> Result<(), FeedError>;

    /// Daily bars for the trailing `lookback_days` plus a best-effort latest price.
    async fn fetch(&self, symbol: &str, lookback_days: u32) -> Result<MarketData, FeedError>;

    /// Idempotent.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

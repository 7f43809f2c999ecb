use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{Config, GATEWAY_TIMEOUT_SECS, QUOTE_WAIT_MS};
use crate::error::Result;
use crate::feed::{FeedError, MarketDataProvider};
use crate::types::{Bar, DataProvenance, MarketData};

pub const SOURCE_NAME: &str = "Interactive Brokers";

/// Snapshot field id carrying the last traded price.
const FIELD_LAST_PRICE: &str = "31";

/// REST client for an Interactive Brokers Client Portal gateway.
///
/// The gateway holds the brokerage session; `connect` only verifies that it is
/// up and authenticated. Contract ids are resolved once per symbol and cached
/// for the lifetime of the client.
pub struct IbGatewayClient {
    base_url: String,
    client_id: u32,
    http: reqwest::Client,
    connected: AtomicBool,
    conids: DashMap<String, i64>,
    quote_wait: Duration,
}

impl IbGatewayClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
            .danger_accept_invalid_certs(cfg.ib_accept_invalid_certs)
            .build()?;

        Ok(Self {
            base_url: cfg.gateway_base_url(),
            client_id: cfg.ib_client_id,
            http,
            connected: AtomicBool::new(false),
            conids: DashMap::new(),
            quote_wait: Duration::from_millis(QUOTE_WAIT_MS),
        })
    }

    async fn resolve_conid(&self, symbol: &str) -> std::result::Result<i64, FeedError> {
        if let Some(conid) = self.conids.get(symbol) {
            return Ok(*conid);
        }

        let url = format!("{}/iserver/secdef/search", self.base_url);
        let resp: Value = self
            .http
            .post(&url)
            .json(&json!({ "symbol": symbol, "secType": "STK" }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FeedError::fetch(symbol, e))?
            .json()
            .await
            .map_err(|e| FeedError::fetch(symbol, e))?;

        let conid = parse_conid(&resp).ok_or_else(|| FeedError::UnknownSymbol(symbol.to_string()))?;
        self.conids.insert(symbol.to_string(), conid);
        debug!(symbol, conid, "Resolved contract id");
        Ok(conid)
    }

    async fn history(&self, symbol: &str, conid: i64, lookback_days: u32) -> std::result::Result<Vec<Bar>, FeedError> {
        let url = format!(
            "{}/iserver/marketdata/history?conid={}&period={}d&bar=1d&outsideRth=false",
            self.base_url, conid, lookback_days
        );
        let resp: Value = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FeedError::fetch(symbol, e))?
            .json()
            .await
            .map_err(|e| FeedError::fetch(symbol, e))?;

        parse_history_bars(&resp).map_err(|e| FeedError::fetch(symbol, e))
    }

    /// Best-effort live last price. The first snapshot request subscribes the
    /// contract; the value is read after the quote wait.
    async fn latest_trade(&self, symbol: &str, conid: i64) -> Option<f64> {
        let url = format!(
            "{}/iserver/marketdata/snapshot?conids={}&fields={}",
            self.base_url, conid, FIELD_LAST_PRICE
        );

        if let Err(e) = self.http.get(&url).send().await {
            debug!(symbol, "Quote subscribe failed: {e}");
            return None;
        }
        tokio::time::sleep(self.quote_wait).await;

        let resp: Value = match self.http.get(&url).send().await {
            Ok(r) => r.json().await.ok()?,
            Err(e) => {
                debug!(symbol, "Quote snapshot failed: {e}");
                return None;
            }
        };
        parse_last_price(&resp)
    }
}

#[async_trait]
impl MarketDataProvider for IbGatewayClient {
    async fn connect(&self) -> std::result::Result<(), FeedError> {
        let url = format!("{}/iserver/auth/status", self.base_url);
        let status: Value = self
            .http
            .post(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FeedError::Connection(format!("{}: {e}", self.base_url)))?
            .json()
            .await
            .map_err(|e| FeedError::Connection(format!("unreadable auth status: {e}")))?;

        let authenticated = status.get("authenticated").and_then(Value::as_bool).unwrap_or(false);
        let connected = status.get("connected").and_then(Value::as_bool).unwrap_or(false);
        if !(authenticated && connected) {
            return Err(FeedError::Connection(format!(
                "gateway session not ready (authenticated={authenticated}, connected={connected})"
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(client_id = self.client_id, "Connected to gateway at {}", self.base_url);
        Ok(())
    }

    async fn fetch(&self, symbol: &str, lookback_days: u32) -> std::result::Result<MarketData, FeedError> {
        if !self.is_connected() {
            return Err(FeedError::NotConnected);
        }

        let conid = self.resolve_conid(symbol).await?;
        let end_time = Utc::now();
        let start_time = end_time - chrono::Duration::days(i64::from(lookback_days));

        let bars = self.history(symbol, conid, lookback_days).await?;
        let last_close = bars.last().map(|b| b.close);

        let latest_price = match (self.latest_trade(symbol, conid).await, last_close) {
            (Some(last), _) => last,
            (None, Some(close)) => close,
            (None, None) => {
                return Err(FeedError::fetch(symbol, "gateway returned no bars and no quote"));
            }
        };

        Ok(MarketData {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            latest_price,
            bars,
            metadata: DataProvenance {
                source: SOURCE_NAME.to_string(),
                timeframe: "1D".to_string(),
                start_time,
                end_time,
            },
        })
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(client_id = self.client_id, "Disconnected from gateway");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// First contract id of a secdef search response. The gateway sends it as
/// either a number or a numeric string.
pub fn parse_conid(v: &Value) -> Option<i64> {
    let first = v.as_array()?.first()?;
    let conid = first.get("conid")?;
    conid.as_i64().or_else(|| conid.as_str().and_then(|s| s.parse().ok()))
}

/// Daily bars from a history response, oldest first.
pub fn parse_history_bars(v: &Value) -> std::result::Result<Vec<Bar>, String> {
    let data = v
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| "history response has no data array".to_string())?;

    let mut bars = Vec::with_capacity(data.len());
    for item in data {
        let field = |k: &str| item.get(k).and_then(number);
        let (Some(t), Some(open), Some(high), Some(low), Some(close)) =
            (field("t"), field("o"), field("h"), field("l"), field("c"))
        else {
            warn!("Skipping malformed history bar: {item}");
            continue;
        };
        let Some(date) = Utc.timestamp_millis_opt(t as i64).single() else {
            continue;
        };
        bars.push(Bar {
            date,
            open,
            high,
            low,
            close,
            volume: field("v").unwrap_or(0.0),
        });
    }

    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

/// Last traded price from a snapshot response. Values prefixed with `C`
/// (prior close) or `H` (halted) are not live trades and yield None.
pub fn parse_last_price(v: &Value) -> Option<f64> {
    let raw = v.as_array()?.first()?.get(FIELD_LAST_PRICE)?;
    if let Some(n) = raw.as_f64() {
        return (n > 0.0).then_some(n);
    }
    let s = raw.as_str()?.trim();
    if s.starts_with('C') || s.starts_with('H') {
        return None;
    }
    s.replace(',', "").parse::<f64>().ok().filter(|p| *p > 0.0)
}

fn number(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn test_config() -> Config {
        Config {
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            ib_host: "127.0.0.1".to_string(),
            ib_port: 1,
            ib_client_id: 1,
            ib_scheme: "http".to_string(),
            ib_accept_invalid_certs: false,
            batch_size: 100,
            lookback_days: 30,
            discovery_interval_secs: None,
        }
    }

    #[test]
    fn conid_accepts_number_or_string() {
        assert_eq!(parse_conid(&json!([{"conid": 265598, "symbol": "AAPL"}])), Some(265598));
        assert_eq!(parse_conid(&json!([{"conid": "272093"}])), Some(272093));
        assert_eq!(parse_conid(&json!([])), None);
        assert_eq!(parse_conid(&json!({"error": "no contracts"})), None);
    }

    #[test]
    fn history_bars_are_sorted_and_malformed_rows_skipped() {
        let resp = json!({
            "symbol": "AAPL",
            "data": [
                {"t": 1_700_172_800_000i64, "o": 2.0, "h": 3.0, "l": 1.5, "c": 2.5, "v": 1000.0},
                {"t": 1_700_086_400_000i64, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 900.0},
                {"t": 1_700_259_200_000i64, "o": 2.5}
            ]
        });
        let bars = parse_history_bars(&resp).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].date < bars[1].date);
        assert_eq!(bars[0].close, 1.5);
        assert_eq!(bars[1].volume, 1000.0);
    }

    #[test]
    fn history_without_data_is_an_error() {
        assert!(parse_history_bars(&json!({"error": "chart data unavailable"})).is_err());
    }

    #[test]
    fn last_price_ignores_prior_close_marker() {
        assert_eq!(parse_last_price(&json!([{"31": "189.84"}])), Some(189.84));
        assert_eq!(parse_last_price(&json!([{"31": "C189.84"}])), None);
        assert_eq!(parse_last_price(&json!([{"31": "H12.00"}])), None);
        assert_eq!(parse_last_price(&json!([{"31": "1,024.50"}])), Some(1024.5));
        assert_eq!(parse_last_price(&json!([{"conid": 1}])), None);
    }

    /// Serves the Client Portal endpoints the client uses. AAPL quotes only a
    /// prior close, LIVE has a live trade, EMPTY has neither bars nor a quote.
    async fn mock_gateway() -> (SocketAddr, Arc<AtomicUsize>) {
        let searches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&searches);

        let app = Router::new()
            .route(
                "/v1/api/iserver/auth/status",
                post(|| async { Json(json!({"authenticated": true, "connected": true})) }),
            )
            .route(
                "/v1/api/iserver/secdef/search",
                post(move |Json(body): Json<Value>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let conid = match body["symbol"].as_str() {
                            Some("AAPL") => 265598,
                            Some("LIVE") => 4815747,
                            Some("EMPTY") => 1,
                            _ => return Json(json!([])),
                        };
                        Json(json!([{"conid": conid, "companyName": "test"}]))
                    }
                }),
            )
            .route(
                "/v1/api/iserver/marketdata/history",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let data = match q.get("conid").map(String::as_str) {
                        Some("1") => json!([]),
                        _ => json!([
                            {"t": 1_700_086_400_000i64, "o": 2.0, "h": 2.2, "l": 1.9, "c": 2.1, "v": 900.0},
                            {"t": 1_700_172_800_000i64, "o": 2.1, "h": 2.3, "l": 2.0, "c": 2.25, "v": 1000.0}
                        ]),
                    };
                    Json(json!({"data": data}))
                }),
            )
            .route(
                "/v1/api/iserver/marketdata/snapshot",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let conid = q.get("conids").cloned().unwrap_or_default();
                    match conid.as_str() {
                        "265598" => Json(json!([{"conid": 265598, "31": "C2.10"}])),
                        "4815747" => Json(json!([{"conid": 4815747, "31": "187.50"}])),
                        _ => Json(json!([{"conid": 1}])),
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr, searches)
    }

    async fn connected_client(addr: SocketAddr) -> IbGatewayClient {
        let mut client = IbGatewayClient::new(&Config {
            ib_port: addr.port(),
            ..test_config()
        })
        .unwrap();
        client.quote_wait = Duration::from_millis(5);
        client.connect().await.unwrap();
        assert!(client.is_connected());
        client
    }

    #[tokio::test]
    async fn prior_close_quote_falls_back_to_last_bar() {
        let (addr, _) = mock_gateway().await;
        let client = connected_client(addr).await;

        let data = client.fetch("AAPL", 30).await.unwrap();

        assert_eq!(data.bars.len(), 2);
        assert_eq!(data.latest_price, 2.25);
        assert_eq!(data.metadata.source, SOURCE_NAME);
        assert_eq!(data.metadata.timeframe, "1D");
    }

    #[tokio::test]
    async fn live_quote_wins_over_last_close() {
        let (addr, _) = mock_gateway().await;
        let client = connected_client(addr).await;

        let data = client.fetch("LIVE", 30).await.unwrap();

        assert_eq!(data.latest_price, 187.5);
    }

    #[tokio::test]
    async fn no_bars_and_no_quote_is_a_fetch_error() {
        let (addr, _) = mock_gateway().await;
        let client = connected_client(addr).await;

        let err = client.fetch("EMPTY", 30).await.unwrap_err();

        assert!(matches!(&err, FeedError::Fetch { symbol, .. } if symbol == "EMPTY"));
        assert!(err.to_string().contains("no bars and no quote"));
    }

    #[tokio::test]
    async fn contract_ids_are_resolved_once_per_symbol() {
        let (addr, searches) = mock_gateway().await;
        let client = connected_client(addr).await;

        client.fetch("AAPL", 30).await.unwrap();
        client.fetch("AAPL", 30).await.unwrap();
        assert_eq!(searches.load(Ordering::SeqCst), 1);

        assert!(matches!(client.fetch("NOPE", 30).await, Err(FeedError::UnknownSymbol(_))));
        assert_eq!(searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_before_connect_is_rejected() {
        let client = IbGatewayClient::new(&test_config()).unwrap();
        assert!(matches!(client.fetch("AAPL", 30).await, Err(FeedError::NotConnected)));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_connection_error() {
        let client = IbGatewayClient::new(&test_config()).unwrap();
        assert!(matches!(client.connect().await, Err(FeedError::Connection(_))));
        assert!(!client.is_connected());
        client.disconnect().await;
    }
}

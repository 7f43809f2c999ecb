//! Database row types matching migrations/0001_init.sql.
//! Used by sqlx for typed queries; converted into domain types at the store boundary.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::Result;
use crate::types::{AssetEntry, Opportunity};

#[derive(Debug, sqlx::FromRow)]
pub struct AssetRow {
    pub symbol: String,
    pub asset_type: String,
    pub exchange: String,
    pub is_active: bool,
    pub filters: String,
    pub metadata: String,
    pub last_updated: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct OpportunityRow {
    pub id: i64,
    pub symbol: String,
    pub timestamp: i64,
    pub market_state: i64,
    pub confidence: f64,
    pub score: f64,
    pub technical_metrics: String,
    pub active_inference_metrics: String,
    pub risk_metrics: String,
    pub metadata: String,
    pub created_at: i64,
}

impl TryFrom<AssetRow> for AssetEntry {
    type Error = crate::error::AppError;

    fn try_from(r: AssetRow) -> Result<Self> {
        Ok(AssetEntry {
            symbol: r.symbol,
            asset_type: r.asset_type,
            exchange: r.exchange,
            is_active: r.is_active,
            filters: serde_json::from_str(&r.filters)?,
            metadata: serde_json::from_str(&r.metadata)?,
            last_updated: from_ns(r.last_updated),
        })
    }
}

impl TryFrom<OpportunityRow> for Opportunity {
    type Error = crate::error::AppError;

    fn try_from(r: OpportunityRow) -> Result<Self> {
        Ok(Opportunity {
            id: Some(r.id),
            symbol: r.symbol,
            timestamp: from_ns(r.timestamp),
            market_state: r.market_state,
            confidence: r.confidence,
            score: r.score,
            technical_metrics: serde_json::from_str(&r.technical_metrics)?,
            active_inference_metrics: serde_json::from_str(&r.active_inference_metrics)?,
            risk_metrics: serde_json::from_str(&r.risk_metrics)?,
            metadata: serde_json::from_str(&r.metadata)?,
            created_at: from_ns(r.created_at),
        })
    }
}

/// Nanosecond UTC epoch for storage. Saturates past year 2262.
pub fn to_ns(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

pub fn from_ns(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanosecond_timestamps_survive_storage() {
        let t = Utc.timestamp_nanos(1_760_000_000_123_456_789);
        assert_eq!(from_ns(to_ns(t)), t);
    }

    #[test]
    fn malformed_blob_is_an_error() {
        let row = AssetRow {
            symbol: "AAPL".to_string(),
            asset_type: "STK".to_string(),
            exchange: "SMART".to_string(),
            is_active: true,
            filters: "{not json".to_string(),
            metadata: "{}".to_string(),
            last_updated: 0,
        };
        assert!(AssetEntry::try_from(row).is_err());
    }
}

use sqlx::SqlitePool;

use crate::db::models::{to_ns, OpportunityRow};
use crate::error::Result;
use crate::types::Opportunity;

const SELECT_COLUMNS: &str = r#"
    SELECT id, symbol, timestamp, market_state, confidence, score,
           technical_metrics, active_inference_metrics, risk_metrics, metadata, created_at
    FROM opportunities
"#;

/// Optional filters for a page of opportunities.
#[derive(Debug, Clone)]
pub struct OpportunityFilter {
    pub min_score: Option<f64>,
    pub market_state: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

/// Append-only store of scored opportunities. Rows are inserted once and
/// never updated.
#[derive(Clone)]
pub struct OpportunityStore {
    pool: SqlitePool,
}

impl OpportunityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one opportunity in its own implicit transaction. Returns the new row id.
    pub async fn insert(&self, o: &Opportunity) -> Result<i64> {
        let technical = serde_json::to_string(&o.technical_metrics)?;
        let inference = serde_json::to_string(&o.active_inference_metrics)?;
        let risk = serde_json::to_string(&o.risk_metrics)?;
        let metadata = serde_json::to_string(&o.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO opportunities (
                symbol, timestamp, market_state, confidence, score,
                technical_metrics, active_inference_metrics, risk_metrics, metadata,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&o.symbol)
        .bind(to_ns(o.timestamp))
        .bind(o.market_state)
        .bind(o.confidence)
        .bind(o.score)
        .bind(technical)
        .bind(inference)
        .bind(risk)
        .bind(metadata)
        .bind(to_ns(o.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Score-descending page. Ties are broken by newest row first.
    pub async fn query(&self, filter: &OpportunityFilter) -> Result<Vec<Opportunity>> {
        let rows: Vec<OpportunityRow> = sqlx::query_as(&format!(
            r#"{SELECT_COLUMNS}
            WHERE (? IS NULL OR score >= ?)
              AND (? IS NULL OR market_state = ?)
            ORDER BY score DESC, id DESC
            LIMIT ? OFFSET ?"#
        ))
        .bind(filter.min_score)
        .bind(filter.min_score)
        .bind(filter.market_state)
        .bind(filter.market_state)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Opportunity::try_from).collect()
    }

    /// Most recent opportunities for one symbol, newest first.
    pub async fn recent_for_symbol(&self, symbol: &str, limit: i64) -> Result<Vec<Opportunity>> {
        let rows: Vec<OpportunityRow> = sqlx::query_as(&format!(
            r#"{SELECT_COLUMNS}
            WHERE symbol = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?"#
        ))
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Opportunity::try_from).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM opportunities")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::db::models::{to_ns, AssetRow};
use crate::error::Result;
use crate::types::AssetEntry;

const SELECT_COLUMNS: &str =
    "SELECT symbol, asset_type, exchange, is_active, filters, metadata, last_updated FROM asset_pool";

/// Persisted set of symbols the discovery pipeline scans.
#[derive(Clone)]
pub struct AssetPoolStore {
    pool: SqlitePool,
}

impl AssetPoolStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every entry flagged active, in symbol order.
    pub async fn active_assets(&self) -> Result<Vec<AssetEntry>> {
        let rows: Vec<AssetRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE is_active = 1 ORDER BY symbol"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(AssetEntry::try_from).collect()
    }

    pub async fn get(&self, symbol: &str) -> Result<Option<AssetEntry>> {
        let row: Option<AssetRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE symbol = ?"))
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AssetEntry::try_from).transpose()
    }

    /// Upsert by symbol, leaving entries not mentioned untouched.
    pub async fn merge(&self, entries: &[AssetEntry]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            upsert(&mut tx, entry).await?;
        }
        tx.commit().await?;
        info!(count = entries.len(), "Asset pool merged {} entries", entries.len());
        Ok(entries.len())
    }

    /// Drop the whole pool and store exactly `entries`.
    pub async fn replace(&self, entries: &[AssetEntry]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM asset_pool").execute(&mut *tx).await?;
        for entry in entries {
            upsert(&mut tx, entry).await?;
        }
        tx.commit().await?;
        info!(count = entries.len(), "Asset pool replaced with {} entries", entries.len());
        Ok(entries.len())
    }
}

async fn upsert(tx: &mut Transaction<'_, Sqlite>, entry: &AssetEntry) -> Result<()> {
    let filters = serde_json::to_string(&entry.filters)?;
    let metadata = serde_json::to_string(&entry.metadata)?;

    sqlx::query(
        r#"
        INSERT INTO asset_pool (symbol, asset_type, exchange, is_active, filters, metadata, last_updated)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(symbol) DO UPDATE SET
            asset_type = excluded.asset_type,
            exchange = excluded.exchange,
            is_active = excluded.is_active,
            filters = excluded.filters,
            metadata = excluded.metadata,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(&entry.symbol)
    .bind(&entry.asset_type)
    .bind(&entry.exchange)
    .bind(entry.is_active)
    .bind(filters)
    .bind(metadata)
    .bind(to_ns(entry.last_updated))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::config::{DEFAULT_PAGE_LIMIT, RECENT_OPPORTUNITIES_LIMIT, SERVICE_NAME, SERVICE_VERSION};
use crate::db::{AssetPoolStore, OpportunityFilter, OpportunityStore};
use crate::discovery::DiscoveryPipeline;
use crate::error::{AppError, Result};
use crate::types::{AssetEntry, AssetInput, Opportunity};

#[derive(Clone)]
pub struct ApiState {
    pub opportunities: OpportunityStore,
    pub assets: AssetPoolStore,
    pub pipeline: Arc<DiscoveryPipeline>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    let v1 = Router::new()
        .route("/opportunities", get(get_opportunities))
        .route("/assets/:symbol", get(get_asset))
        .route("/asset-pool", post(update_asset_pool))
        .route("/analyze", post(run_analysis))
        .route("/stats/latency", get(get_stats_latency));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1", v1)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct OpportunitiesQuery {
    pub min_score: Option<f64>,
    pub market_state: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    #[default]
    Merge,
    Replace,
}

#[derive(Deserialize)]
pub struct AssetPoolQuery {
    #[serde(default)]
    pub mode: PoolMode,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct AssetDetailResponse {
    pub asset: Option<AssetEntry>,
    pub opportunities: Vec<Opportunity>,
}

#[derive(Serialize)]
pub struct AssetPoolResponse {
    pub status: &'static str,
    pub updated: usize,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: SERVICE_NAME,
        status: "running",
        version: SERVICE_VERSION,
    })
}

async fn health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_opportunities(
    State(state): State<ApiState>,
    Query(params): Query<OpportunitiesQuery>,
) -> Result<Json<Vec<Opportunity>>> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = params.offset.unwrap_or(0);
    if limit < 0 || offset < 0 {
        return Err(AppError::BadRequest("limit and offset must not be negative".to_string()));
    }

    let filter = OpportunityFilter {
        min_score: params.min_score,
        market_state: params.market_state,
        limit,
        offset,
    };
    Ok(Json(state.opportunities.query(&filter).await?))
}

async fn get_asset(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<AssetDetailResponse>> {
    let asset = state.assets.get(&symbol).await?;
    let opportunities = state
        .opportunities
        .recent_for_symbol(&symbol, RECENT_OPPORTUNITIES_LIMIT)
        .await?;
    Ok(Json(AssetDetailResponse { asset, opportunities }))
}

async fn update_asset_pool(
    State(state): State<ApiState>,
    Query(params): Query<AssetPoolQuery>,
    Json(items): Json<Vec<AssetInput>>,
) -> Result<Json<AssetPoolResponse>> {
    let now = Utc::now();
    let entries = items
        .into_iter()
        .map(|item| item.into_entry(now))
        .collect::<Result<Vec<_>>>()?;

    let updated = match params.mode {
        PoolMode::Merge => state.assets.merge(&entries).await?,
        PoolMode::Replace => state.assets.replace(&entries).await?,
    };
    info!(mode = ?params.mode, updated, "Asset pool updated");

    Ok(Json(AssetPoolResponse {
        status: "success",
        updated,
    }))
}

/// Runs discovery synchronously. Always answers 200; a fatal run failure is
/// reported in the body.
async fn run_analysis(State(state): State<ApiState>) -> Json<AnalyzeResponse> {
    let response = match state.pipeline.run().await {
        Ok(summary) => AnalyzeResponse {
            status: "success",
            analyzed_count: Some(summary.analyzed_count()),
            failed_count: Some(summary.failed.len()),
            message: None,
            timestamp: Utc::now(),
        },
        Err(e) => AnalyzeResponse {
            status: "error",
            analyzed_count: None,
            failed_count: None,
            message: Some(e.to_string()),
            timestamp: Utc::now(),
        },
    };
    Json(response)
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

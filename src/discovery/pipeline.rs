use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::analysis::{Analysis, AnalysisError, MarketAnalyzer};
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{Config, ANALYSIS_VERSION, DEFAULT_BATCH_SIZE, DEFAULT_LOOKBACK_DAYS};
use crate::db::models::to_ns;
use crate::db::{AssetPoolStore, OpportunityStore};
use crate::error::AppError;
use crate::feed::{FeedError, MarketDataProvider};
use crate::scorer::{score, Score, ScoreError};
use crate::types::{AssetEntry, Opportunity};

/// Failures that abort a whole run before any asset is processed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Connection(FeedError),

    #[error("failed to read asset pool: {0}")]
    PoolRead(#[source] AppError),
}

/// Why a single asset produced no opportunity. Never aborts the run.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error(transparent)]
    Fetch(#[from] FeedError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error("failed to persist opportunity: {0}")]
    Persist(#[source] AppError),
}

#[derive(Debug)]
pub struct AssetFailure {
    pub symbol: String,
    pub error: AssetError,
}

/// Result of processing one asset.
#[derive(Debug)]
pub enum AssetOutcome {
    Discovered(Opportunity),
    Failed(AssetFailure),
}

/// What a run produced. Opportunities are already persisted; order across
/// assets is unspecified.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub opportunities: Vec<Opportunity>,
    pub failed: Vec<AssetFailure>,
}

impl RunSummary {
    pub fn analyzed_count(&self) -> usize {
        self.opportunities.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub lookback_days: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            batch_size: cfg.batch_size,
            lookback_days: cfg.lookback_days,
        }
    }
}

/// Scans every active asset in the pool: fetch market data, analyze, score and
/// persist one opportunity per asset.
///
/// Assets are processed in batches of `batch_size`, concurrently within a
/// batch and one batch after another. Each opportunity is committed as soon as
/// it is produced. Runs are serialized; the feed session is opened at the start
/// of a run and closed at its end whatever the outcome.
pub struct DiscoveryPipeline {
    provider: Arc<dyn MarketDataProvider>,
    analyzer: Arc<dyn MarketAnalyzer>,
    assets: AssetPoolStore,
    opportunities: OpportunityStore,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    settings: PipelineSettings,
    run_lock: Mutex<()>,
}

impl DiscoveryPipeline {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        analyzer: Arc<dyn MarketAnalyzer>,
        assets: AssetPoolStore,
        opportunities: OpportunityStore,
        mut settings: PipelineSettings,
    ) -> Self {
        settings.batch_size = settings.batch_size.max(1);
        Self {
            provider,
            analyzer,
            assets,
            opportunities,
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_telemetry(mut self, health: Arc<HealthState>, latency: Arc<LatencyStats>) -> Self {
        self.health = health;
        self.latency = latency;
        self
    }

    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let _guard = self.run_lock.lock().await;
        self.health.set_run_in_progress(true);
        let started = Instant::now();

        let outcome = self.run_connected().await;

        self.provider.disconnect().await;
        self.health.set_feed_connected(false);
        self.health.set_run_in_progress(false);

        match &outcome {
            Ok(summary) => {
                self.health.record_completed_run(
                    to_ns(Utc::now()).max(0) as u64,
                    summary.opportunities.len() as u64,
                    summary.failed.len() as u64,
                );
                info!(
                    discovered = summary.opportunities.len(),
                    failed = summary.failed.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Discovery run complete: {} opportunities, {} assets skipped",
                    summary.opportunities.len(),
                    summary.failed.len(),
                );
            }
            Err(e) => {
                self.health.record_aborted_run();
                error!("Discovery run aborted: {e}");
            }
        }

        outcome
    }

    async fn run_connected(&self) -> Result<RunSummary, PipelineError> {
        self.provider.connect().await.map_err(PipelineError::Connection)?;
        self.health.set_feed_connected(true);

        let assets = self.assets.active_assets().await.map_err(PipelineError::PoolRead)?;
        let batch_count = assets.len().div_ceil(self.settings.batch_size);
        info!(
            assets = assets.len(),
            batches = batch_count,
            "Discovery run started for {} active assets",
            assets.len(),
        );

        let mut summary = RunSummary::default();
        for (i, batch) in assets.chunks(self.settings.batch_size).enumerate() {
            let outcomes = join_all(batch.iter().map(|asset| self.process_asset(asset))).await;

            let before = summary.opportunities.len();
            for outcome in outcomes {
                match outcome {
                    AssetOutcome::Discovered(o) => summary.opportunities.push(o),
                    AssetOutcome::Failed(f) => summary.failed.push(f),
                }
            }
            debug!(
                batch = i + 1,
                of = batch_count,
                size = batch.len(),
                discovered = summary.opportunities.len() - before,
                "Batch finished"
            );
        }

        Ok(summary)
    }

    async fn process_asset(&self, asset: &AssetEntry) -> AssetOutcome {
        let started = Instant::now();
        let result = self.discover(asset).await;
        self.latency.record(started.elapsed());

        match result {
            Ok(opportunity) => {
                debug!(
                    symbol = %asset.symbol,
                    score = opportunity.score,
                    market_state = opportunity.market_state,
                    "Opportunity recorded"
                );
                AssetOutcome::Discovered(opportunity)
            }
            Err(error) => {
                warn!(symbol = %asset.symbol, "Error processing asset {}: {error}", asset.symbol);
                AssetOutcome::Failed(AssetFailure {
                    symbol: asset.symbol.clone(),
                    error,
                })
            }
        }
    }

    async fn discover(&self, asset: &AssetEntry) -> Result<Opportunity, AssetError> {
        let data = self.provider.fetch(&asset.symbol, self.settings.lookback_days).await?;
        let analysis = self.analyzer.analyze(&asset.symbol, &data).await?;
        let scored = score(&analysis.state_info, &analysis.signals, &analysis.indicators)?;

        let mut opportunity = build_opportunity(asset, &analysis, &scored, Utc::now())?;
        let id = self.opportunities.insert(&opportunity).await.map_err(AssetError::Persist)?;
        opportunity.id = Some(id);
        Ok(opportunity)
    }
}

/// Assemble the opportunity record and its metric blobs from one analysis
/// and the score computed from it.
pub fn build_opportunity(
    asset: &AssetEntry,
    analysis: &Analysis,
    scored: &Score,
    now: DateTime<Utc>,
) -> Result<Opportunity, AssetError> {
    let state = &analysis.state_info;

    Ok(Opportunity {
        id: None,
        symbol: asset.symbol.clone(),
        timestamp: now,
        market_state: state.state,
        confidence: state.confidence,
        score: scored.value,
        technical_metrics: analysis.indicators.latest_metrics()?,
        active_inference_metrics: json!({
            "composite_signal": scored.signal,
            "state_characteristics": state.characteristics,
        }),
        risk_metrics: json!(scored.characteristics),
        metadata: json!({
            "analysis_version": ANALYSIS_VERSION,
            "asset_type": asset.asset_type,
            "exchange": asset.exchange,
        }),
        created_at: now,
    })
}

mod analysis;
mod api;
mod config;
mod db;
mod discovery;
mod error;
mod feed;
mod scorer;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::analysis::RegimeAnalyzer;
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::{router, ApiState};
use crate::config::{Config, SERVICE_NAME, SERVICE_VERSION};
use crate::db::{AssetPoolStore, OpportunityStore};
use crate::discovery::{DiscoveryPipeline, DiscoveryScheduler, PipelineSettings};
use crate::error::Result;
use crate::feed::IbGatewayClient;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!("{SERVICE_NAME} v{SERVICE_VERSION} starting");

    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let assets = AssetPoolStore::new(pool.clone());
    let opportunities = OpportunityStore::new(pool.clone());
    let active = assets.active_assets().await?.len();
    info!("Asset pool holds {active} active assets, {} opportunities on record", opportunities.count().await?);

    // --- Discovery pipeline ---
    let gateway = IbGatewayClient::new(&cfg)?;
    info!(
        client_id = cfg.ib_client_id,
        "Market data gateway at {}",
        cfg.gateway_base_url()
    );

    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let pipeline = Arc::new(
        DiscoveryPipeline::new(
            Arc::new(gateway),
            Arc::new(RegimeAnalyzer::default()),
            assets.clone(),
            opportunities.clone(),
            PipelineSettings::from(&cfg),
        )
        .with_telemetry(Arc::clone(&health), Arc::clone(&latency)),
    );

    // Scheduled discovery (background, opt-in)
    match cfg.discovery_interval_secs {
        Some(secs) if secs > 0 => {
            let scheduler = DiscoveryScheduler::new(Arc::clone(&pipeline), Duration::from_secs(secs));
            tokio::spawn(async move { scheduler.run().await });
        }
        _ => info!("DISCOVERY_INTERVAL_SECS not set, discovery runs on POST /api/v1/analyze only"),
    }

    // --- HTTP API server ---
    let api_state = ApiState {
        opportunities,
        assets,
        pipeline,
        health,
        latency,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

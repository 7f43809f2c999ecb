use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::discovery::DiscoveryPipeline;

/// Background task that triggers a discovery run on a fixed interval.
/// Runs share the pipeline's lock with on-demand `/analyze` requests.
pub struct DiscoveryScheduler {
    pipeline: Arc<DiscoveryPipeline>,
    every: Duration,
}

impl DiscoveryScheduler {
    pub fn new(pipeline: Arc<DiscoveryPipeline>, every: Duration) -> Self {
        Self { pipeline, every }
    }

    pub async fn run(self) {
        info!("Discovery scheduler started, running every {}s", self.every.as_secs());
        let mut interval = tokio::time::interval(self.every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            if let Err(e) = self.pipeline.run().await {
                warn!("Scheduled discovery run failed: {e}");
            }
        }
    }
}

//! Shared health state for the /health endpoint.
//! Updated by the discovery service, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

use crate::db::models::from_ns;

#[derive(Default)]
pub struct HealthState {
    /// True while a run holds an open feed session.
    feed_connected: AtomicBool,
    run_in_progress: AtomicBool,
    /// Nanosecond timestamp of the last finished run (0 = none).
    last_run_at_ns: AtomicU64,
    last_run_discovered: AtomicU64,
    last_run_failed: AtomicU64,
    /// Runs that aborted before processing assets.
    aborted_runs: AtomicU64,
    completed_runs: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub feed_connected: bool,
    pub run_in_progress: bool,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_run_discovered: u64,
    pub last_run_failed: u64,
    pub completed_runs: u64,
    pub aborted_runs: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feed_connected(&self, v: bool) {
        self.feed_connected.store(v, Ordering::Relaxed);
    }

    pub fn set_run_in_progress(&self, v: bool) {
        self.run_in_progress.store(v, Ordering::Relaxed);
    }

    pub fn record_completed_run(&self, at_ns: u64, discovered: u64, failed: u64) {
        self.last_run_at_ns.store(at_ns, Ordering::Relaxed);
        self.last_run_discovered.store(discovered, Ordering::Relaxed);
        self.last_run_failed.store(failed, Ordering::Relaxed);
        self.completed_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted_run(&self) {
        self.aborted_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_ns = self.last_run_at_ns.load(Ordering::Relaxed);
        HealthSnapshot {
            status: "healthy",
            feed_connected: self.feed_connected.load(Ordering::Relaxed),
            run_in_progress: self.run_in_progress.load(Ordering::Relaxed),
            last_run_at: (last_ns > 0).then(|| from_ns(last_ns.min(i64::MAX as u64) as i64)),
            last_run_discovered: self.last_run_discovered.load(Ordering::Relaxed),
            last_run_failed: self.last_run_failed.load(Ordering::Relaxed),
            completed_runs: self.completed_runs.load(Ordering::Relaxed),
            aborted_runs: self.aborted_runs.load(Ordering::Relaxed),
        }
    }
}

//! In-memory histogram of per-asset processing time (fetch through persist).

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared latency stats. The discovery pipeline records, the API reads.
/// Values stored in microseconds; tracks 1us to 10 minutes.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 600_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 600_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.inner.lock() else {
            return LatencySnapshot { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        };
        let samples = h.len();
        let at = |q: f64| (samples > 0).then(|| h.value_at_quantile(q) as f64 / 1000.0);
        LatencySnapshot {
            samples,
            p50_ms: at(0.5),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
            max_ms: (samples > 0).then(|| h.max() as f64 / 1000.0),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let snap = LatencyStats::new().snapshot();
        assert_eq!(snap.samples, 0);
        assert!(snap.p50_ms.is_none() && snap.max_ms.is_none());
    }

    #[test]
    fn percentiles_are_reported_in_milliseconds() {
        let stats = LatencyStats::new();
        for ms in 1..=100 {
            stats.record(Duration::from_millis(ms));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 100);
        let p50 = snap.p50_ms.unwrap();
        assert!((49.0..=51.0).contains(&p50), "p50={p50}");
        assert!(snap.max_ms.unwrap() >= 99.0);
    }
}

//! Router Metrics
//!
//! In-process counters for the generation router:
//! - Outcomes (requests, successes, failures, cache hits)
//! - Resilience events (fallback hops, cooldowns set, audits run)
//! - End-to-end latency distribution
//! - Requests serviced per backend
//!
//! Everything is lock-free apart from the per-backend map, which is a
//! `DashMap`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

// ============================================================================
// Latency Histogram
// ============================================================================

/// Fixed-bucket histogram of millisecond latencies
#[derive(Debug)]
pub struct LatencyHistogram {
    /// Upper bounds of each bucket, ascending
    bounds: Vec<u64>,
    /// Count per bucket; the last slot counts values above every bound
    counts: Vec<AtomicU64>,
    total: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(vec![
            10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000, 120_000,
        ])
    }
}

impl LatencyHistogram {
    /// Create with the given bucket upper bounds
    #[must_use]
    pub fn new(mut bounds: Vec<u64>) -> Self {
        bounds.sort_unstable();
        bounds.dedup();
        let counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            total: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record one latency
    pub fn record(&self, millis: u64) {
        let idx = self
            .bounds
            .iter()
            .position(|&bound| millis <= bound)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(millis, Ordering::Relaxed);
        self.max.fetch_max(millis, Ordering::Relaxed);
    }

    /// Bucket upper bound at or below which `quantile` of samples fall
    ///
    /// Samples above the largest bound report the observed maximum.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn quantile(&self, quantile: f64) -> u64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        let target = ((total as f64) * quantile.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;
        for (idx, count) in self.counts.iter().enumerate() {
            cumulative += count.load(Ordering::Relaxed);
            if cumulative >= target {
                return self
                    .bounds
                    .get(idx)
                    .copied()
                    .unwrap_or_else(|| self.max.load(Ordering::Relaxed));
            }
        }
        self.max.load(Ordering::Relaxed)
    }

    /// Number of samples
    #[must_use]
    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Mean latency
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        let total = self.count();
        if total == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / total as f64
        }
    }
}

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Router Metrics
// ============================================================================

/// Metrics recorded by the generation router
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Requests received
    pub requests: Counter,
    /// Requests that returned a successful result
    pub successes: Counter,
    /// Requests that returned a failed result
    pub failures: Counter,
    /// Requests served from the semantic cache
    pub cache_hits: Counter,
    /// Cross-backend fallback hops taken
    pub fallbacks: Counter,
    /// Cooldowns set after rate-limit exhaustion
    pub cooldowns: Counter,
    /// Audit generations run
    pub audits: Counter,
    /// End-to-end latency
    pub latency: LatencyHistogram,
    by_backend: DashMap<String, u64>,
}

/// Point-in-time copy of [`RouterMetrics`]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests received
    pub requests: u64,
    /// Successful results
    pub successes: u64,
    /// Failed results
    pub failures: u64,
    /// Cache hits
    pub cache_hits: u64,
    /// Fallback hops
    pub fallbacks: u64,
    /// Cooldowns set
    pub cooldowns: u64,
    /// Audits run
    pub audits: u64,
    /// Median latency (ms, bucket bound)
    pub latency_p50_ms: u64,
    /// 90th percentile latency (ms, bucket bound)
    pub latency_p90_ms: u64,
    /// 99th percentile latency (ms, bucket bound)
    pub latency_p99_ms: u64,
    /// Successful requests per servicing backend
    pub by_backend: BTreeMap<String, u64>,
}

impl RouterMetrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request serviced by `backend`
    pub fn record_serviced(&self, backend: &str) {
        *self.by_backend.entry(backend.to_string()).or_insert(0) += 1;
    }

    /// Snapshot every metric
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.get(),
            successes: self.successes.get(),
            failures: self.failures.get(),
            cache_hits: self.cache_hits.get(),
            fallbacks: self.fallbacks.get(),
            cooldowns: self.cooldowns.get(),
            audits: self.audits.get(),
            latency_p50_ms: self.latency.quantile(0.5),
            latency_p90_ms: self.latency.quantile(0.9),
            latency_p99_ms: self.latency.quantile(0.99),
            by_backend: self
                .by_backend
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_quantiles() {
        let hist = LatencyHistogram::new(vec![10, 100, 1_000]);
        for _ in 0..90 {
            hist.record(5);
        }
        for _ in 0..9 {
            hist.record(50);
        }
        hist.record(5_000);

        assert_eq!(hist.count(), 100);
        assert_eq!(hist.quantile(0.5), 10);
        assert_eq!(hist.quantile(0.9), 10);
        assert_eq!(hist.quantile(0.99), 100);
        // Above every bound -> observed max
        assert_eq!(hist.quantile(1.0), 5_000);
    }

    #[test]
    fn test_empty_histogram() {
        let hist = LatencyHistogram::default();
        assert_eq!(hist.quantile(0.99), 0);
        assert!(hist.mean().abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot() {
        let metrics = RouterMetrics::new();
        metrics.requests.inc();
        metrics.requests.inc();
        metrics.successes.inc();
        metrics.fallbacks.inc();
        metrics.record_serviced("claude");
        metrics.record_serviced("claude");
        metrics.latency.record(120);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.fallbacks, 1);
        assert_eq!(snapshot.by_backend.get("claude"), Some(&2));
        assert_eq!(snapshot.latency_p50_ms, 250);
    }
}

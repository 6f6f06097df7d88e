//! Per-backend cumulative usage counters (diagnostics only)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated after every cascade run
#[derive(Debug, Default)]
pub struct UsageCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_micros: AtomicU64,
}

/// Point-in-time copy of [`UsageCounters`]
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    /// Generations attempted
    pub requests: u64,
    /// Generations that failed
    pub failures: u64,
    /// Prompt tokens consumed
    pub input_tokens: u64,
    /// Completion tokens produced
    pub output_tokens: u64,
    /// Accumulated cost in USD
    pub cost_usd: f64,
}

impl UsageCounters {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful generation
    pub fn record_success(&self, input_tokens: u32, output_tokens: u32, cost_usd: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(u64::from(input_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(output_tokens), Ordering::Relaxed);
        self.cost_micros
            .fetch_add(to_micros(cost_usd), Ordering::Relaxed);
    }

    /// Record a failed generation
    pub fn record_failure(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters
    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            cost_usd: self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_micros(cost_usd: f64) -> u64 {
    if cost_usd.is_finite() && cost_usd > 0.0 {
        (cost_usd * 1_000_000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let usage = UsageCounters::new();
        usage.record_success(1_000, 500, 0.28);
        usage.record_success(10, 10, 0.0);
        usage.record_failure();

        let snapshot = usage.snapshot();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.input_tokens, 1_010);
        assert_eq!(snapshot.output_tokens, 510);
        assert!((snapshot.cost_usd - 0.28).abs() < 1e-9);
    }

    #[test]
    fn test_negative_cost_ignored() {
        let usage = UsageCounters::new();
        usage.record_success(1, 1, -5.0);
        assert!(usage.snapshot().cost_usd.abs() < f64::EPSILON);
    }
}

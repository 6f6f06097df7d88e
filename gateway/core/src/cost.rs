//! Cost Accounting
//!
//! The router reports one [`CostEntry`] per serviced request (and one per
//! audit) to a [`CostRecorder`]. Recording is fire-and-forget: failures are
//! logged by the router and never affect the result. [`CostLedger`] is an
//! in-memory recorder with per-backend totals.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::routing::config::ExecutionMode;

/// One cost report
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CostEntry {
    /// Backend name (without model)
    pub backend: String,
    /// Mode the request ran in
    pub mode: ExecutionMode,
    /// Step the request belonged to
    pub step_id: String,
    /// Cost in USD
    pub cost_usd: f64,
    /// Prompt tokens
    pub tokens_in: u32,
    /// Completion tokens
    pub tokens_out: u32,
    /// Wall-clock time
    pub elapsed_ms: u64,
    /// Served from cache
    pub cached: bool,
    /// When the entry was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Sink for cost reports
#[async_trait]
pub trait CostRecorder: Send + Sync {
    /// Record one entry
    async fn record(&self, entry: CostEntry) -> anyhow::Result<()>;
}

/// Accumulated totals for one backend
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BackendTotals {
    /// Entries recorded
    pub requests: u64,
    /// Total cost in USD
    pub cost_usd: f64,
    /// Total prompt tokens
    pub tokens_in: u64,
    /// Total completion tokens
    pub tokens_out: u64,
}

/// In-memory cost recorder
#[derive(Debug, Default)]
pub struct CostLedger {
    entries: Mutex<Vec<CostEntry>>,
}

impl CostLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded entry
    #[must_use]
    pub fn entries(&self) -> Vec<CostEntry> {
        self.entries.lock().clone()
    }

    /// Total cost across all backends
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.entries.lock().iter().map(|e| e.cost_usd).sum()
    }

    /// Totals per backend
    #[must_use]
    pub fn totals(&self) -> BTreeMap<String, BackendTotals> {
        let mut totals: BTreeMap<String, BackendTotals> = BTreeMap::new();
        for entry in self.entries.lock().iter() {
            let t = totals.entry(entry.backend.clone()).or_default();
            t.requests += 1;
            t.cost_usd += entry.cost_usd;
            t.tokens_in += u64::from(entry.tokens_in);
            t.tokens_out += u64::from(entry.tokens_out);
        }
        totals
    }
}

#[async_trait]
impl CostRecorder for CostLedger {
    async fn record(&self, entry: CostEntry) -> anyhow::Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

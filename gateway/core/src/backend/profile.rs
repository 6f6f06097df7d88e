//! Backend Profile
//!
//! The static half of a backend: identity, models, pricing and retry policy,
//! plus its usage counters. Every client embeds one.

use super::usage::UsageCounters;
use crate::routing::config::{
    BackendConfig, BackendKind, ModelCatalog, Pricing, RetryConfig, Specialty,
};

/// Identity and policy shared by every backend implementation
#[derive(Debug)]
pub struct BackendProfile {
    /// Unique backend name
    pub name: String,
    /// Backend variant
    pub kind: BackendKind,
    /// Declared specialties
    pub specialties: Vec<Specialty>,
    /// Token pricing
    pub pricing: Pricing,
    /// Models and per-mode orderings
    pub models: ModelCatalog,
    /// Retry budget and backoff
    pub retry: RetryConfig,
    /// Cumulative usage
    pub usage: UsageCounters,
}

impl BackendProfile {
    /// Create a profile with kind-default specialties, free pricing and
    /// default retry policy
    pub fn new(name: impl Into<String>, kind: BackendKind, models: ModelCatalog) -> Self {
        Self {
            name: name.into(),
            kind,
            specialties: kind.default_specialties(),
            pricing: Pricing::free(),
            models,
            retry: RetryConfig::default(),
            usage: UsageCounters::new(),
        }
    }

    /// Build from configuration; `default_retry` applies unless the backend
    /// overrides it
    #[must_use]
    pub fn from_config(config: &BackendConfig, default_retry: &RetryConfig) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            specialties: config.effective_specialties(),
            pricing: config.pricing,
            models: config.models.clone(),
            retry: config.retry.clone().unwrap_or_else(|| default_retry.clone()),
            usage: UsageCounters::new(),
        }
    }

    /// Set pricing
    #[must_use]
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set specialties
    #[must_use]
    pub fn with_specialties(mut self, specialties: Vec<Specialty>) -> Self {
        self.specialties = specialties;
        self
    }
}

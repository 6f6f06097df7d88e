//! Gateway Core - Generation Routing & Resilience Layer
//!
//! Turns a single "produce text for this prompt" request into a reliable call
//! against a pool of unreliable, rate-limited, heterogeneous text-generation
//! backends, while keeping cost and latency down.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     GenerationRouter                          │
//! │   policy ─► cache ─► cascade ─► cooldown/fallback ─► cost      │
//! └───────┬──────────────────┬───────────────────┬───────────────┘
//!         │                  │                   │
//!  ┌──────┴──────┐   ┌───────┴───────┐   ┌───────┴────────┐
//!  │RoutingPolicy│   │CascadeExecutor│   │CooldownTracker │
//!  │   (pure)    │   │ retry/backoff │   │ TTL per backend│
//!  └─────────────┘   └───────┬───────┘   └────────────────┘
//!                            │
//!          ┌─────────────────┼──────────────────┐
//!     ┌────┴─────┐     ┌─────┴─────┐     ┌──────┴─────┐
//!     │ OpenAI   │     │ Anthropic │     │   Ollama   │
//!     │compatible│     │ messages  │     │   local    │
//!     └──────────┘     └───────────┘     └────────────┘
//!
//!  SpeculativeDecoder: draft backend + verify backend (beside the router)
//! ```
//!
//! # Key Types
//!
//! - [`GenerationRouter`]: entry point; `execute(request, step)` and `close()`
//! - [`Backend`]: one provider; `generate`, `name`, `specialties`, `close`
//! - [`RoutingPolicy`]: `(mode, step, availability) -> RoutingDecision`
//! - [`CascadeExecutor`]: per-backend model cascade with retry and backoff
//! - [`CooldownTracker`]: rate-limit cooldown gate
//! - [`SpeculativeDecoder`]: draft + verify acceleration
//!
//! # Quick Start
//!
//! ```ignore
//! use gateway_core::{GatewayConfig, GenerationRequest, RouterBuilder, Step, StepType};
//!
//! let mut config = GatewayConfig::load_or_default(None)?;
//! config.apply_env()?;
//! config.validate()?;
//!
//! let router = RouterBuilder::from_config(&config)?.build()?;
//! let step = Step::new("step-1", StepType::CodeGeneration);
//! let result = router.execute(&GenerationRequest::new("Write a tokenizer"), &step).await;
//! router.close().await;
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: provider clients and the request/result types
//! - [`routing`]: policy, cascade, cooldown, fallback, metrics, router
//! - [`speculative`]: draft/verify decoder
//! - [`cache`]: semantic cache interface and in-memory implementation
//! - [`cost`]: cost recorder interface and in-memory ledger
//! - [`config`]: TOML configuration with environment overrides
//! - [`step`]: step metadata from the upstream planner
//! - [`error`]: failure taxonomy and construction errors

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod cost;
pub mod error;
pub mod routing;
pub mod speculative;
pub mod step;

// Backend exports
pub use backend::{
    create_backend, AnthropicBackend, AttemptError, Backend, BackendProfile, Completion,
    GenerationRequest, GenerationResult, OllamaBackend, OpenAiCompatBackend, OutputConstraint,
    UsageCounters, UsageSnapshot,
};

// Routing exports
pub use routing::{
    Availability, BackendConfig, BackendKind, BackoffPolicy, CascadeExecutor, CooldownTracker,
    ExecutionMode, FallbackPlanner, FallbackResolution, FallbackTable, GenerationRouter,
    MetricsSnapshot, ModelCascade, ModelCatalog, Pricing, Protocol, RetryConfig, RouterBuilder,
    RouterMetrics, RoutingDecision, RoutingPolicy, RoutingReason, RoutingTable, Specialty,
};

// Collaborator exports
pub use cache::{CacheHit, ExactMatchCache, SemanticCache};
pub use cost::{CostEntry, CostLedger, CostRecorder};

// Config exports
pub use config::{CacheSettings, GatewayConfig, SpeculativeConfig};

pub use error::{ConfigError, ErrorKind, GatewayError, GenerationError};
pub use speculative::{SpeculativeDecoder, SpeculativeResult, TokenAgreement};
pub use step::{Step, StepType};

//! Generation Routing
//!
//! Routing and resilience for generation requests: which backend runs a
//! request, how each backend walks its models, and what happens when a
//! backend runs out of rate-limit headroom.
//!
//! # Architecture
//!
//! ```text
//! +--------------------+
//! |  GenerationRouter  |  <-- Entry point for all generation requests
//! +---------+----------+
//!           |
//!           v
//! +--------------------+     +------------------+
//! |   RoutingPolicy    | <-- |  CooldownTracker |  availability snapshot
//! +---------+----------+     +------------------+
//!           |
//!           v
//! +--------------------+
//! |  CascadeExecutor   |  <-- per-backend model list, retry, backoff
//! +---------+----------+
//!           |  rate-limit exhaustion
//!           v
//! +--------------------+
//! |  FallbackPlanner   |  <-- single cross-backend hop per mode
//! +--------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Pure selection**: the policy is a function of its inputs
//! 2. **Failures are values**: nothing in the request path returns `Err`
//! 3. **Bounded retries**: backoff never exceeds its cap, fallback is one hop
//! 4. **No global state**: the router owns its backends and trackers

pub mod cascade;
pub mod config;
pub mod cooldown;
pub mod fallback;
pub mod metrics;
pub mod policy;
pub mod router;

#[cfg(test)]
pub mod test_utils;

pub use cascade::{AttemptRecord, CascadeExecutor, CascadeOutcome, ModelCascade};
pub use config::*;
pub use cooldown::{CooldownTracker, DEFAULT_COOLDOWN_TTL};
pub use fallback::{FallbackPlanner, FallbackResolution};
pub use metrics::{LatencyHistogram, MetricsSnapshot, RouterMetrics};
pub use policy::{Availability, RoutingDecision, RoutingPolicy, RoutingReason};
pub use router::{
    GenerationRouter, RouterBuilder, DEFAULT_COLLABORATOR_TIMEOUT, DEFAULT_MIN_SIMILARITY,
};

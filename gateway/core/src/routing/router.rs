//! Generation Router
//!
//! The main entry point for generation requests. Coordinates the routing
//! policy, semantic cache, model cascades, cooldowns, cross-backend fallback,
//! cost reporting and DOUBLE-CHECK audits.
//!
//! # Request flow
//!
//! ```text
//! execute(request, step)
//!   1. policy.select(mode, step, availability)     -> primary (+ audit)
//!   2. cache.get(prompt, namespace)                -> hit? return zero-cost result
//!   3. primary.generate_in(mode, request)          -> model cascade
//!   4. rate-limit exhaustion?
//!        mark primary cooling down
//!        fallback target for mode?  -> rerun once on target (single hop)
//!        targets but none usable?   -> NoFallbackAvailable
//!   5. success -> cache.put, cost report, audit (DOUBLE-CHECK)
//!   6. return result annotated with the servicing backend
//! ```
//!
//! `execute` never returns `Err`: every failure is a value inside the result.
//!
//! # Usage
//!
//! ```ignore
//! let router = RouterBuilder::from_config(&config)?.build()?;
//! let result = router.execute(&GenerationRequest::new("..."), &step).await;
//! router.close().await;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::config::{ExecutionMode, RoutingTable};
use super::cooldown::{CooldownTracker, DEFAULT_COOLDOWN_TTL};
use super::fallback::{FallbackPlanner, FallbackResolution};
use super::metrics::RouterMetrics;
use super::policy::{Availability, RoutingDecision, RoutingPolicy, RoutingReason};
use crate::backend::{create_backend, Backend, GenerationRequest, GenerationResult};
use crate::cache::{CacheHit, ExactMatchCache, SemanticCache, DEFAULT_NAMESPACE};
use crate::config::GatewayConfig;
use crate::cost::{CostEntry, CostRecorder};
use crate::error::{ErrorKind, GatewayError, GenerationError};
use crate::step::Step;

/// Similarity below which cache hits are ignored, unless configured
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.9;

/// Longest wait on a cache or cost recorder call before it is abandoned
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`GenerationRouter`]
pub struct RouterBuilder {
    backends: BTreeMap<String, Arc<dyn Backend>>,
    routing: RoutingTable,
    mode: ExecutionMode,
    cooldown_ttl: Duration,
    cache: Option<Arc<dyn SemanticCache>>,
    min_similarity: f32,
    cost_recorder: Option<Arc<dyn CostRecorder>>,
    collaborator_timeout: Duration,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    /// Empty builder with default routing table, BUILD mode and 30 s cooldown
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            routing: RoutingTable::default(),
            mode: ExecutionMode::default(),
            cooldown_ttl: DEFAULT_COOLDOWN_TTL,
            cache: None,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            cost_recorder: None,
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }

    /// Builder populated from configuration
    ///
    /// Backends that are disabled or lack credentials are skipped. When the
    /// cache is enabled an in-memory [`ExactMatchCache`] is attached; replace
    /// it with [`cache`](Self::cache).
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut builder = Self::new()
            .routing(config.routing.clone())
            .mode(config.mode)
            .cooldown_ttl(config.cooldown_ttl())
            .min_similarity(config.cache.min_similarity);

        for backend_config in &config.backends {
            if let Some(backend) =
                create_backend(backend_config, config.request_timeout(), &config.retry)?
            {
                debug!(backend = %backend_config.name, kind = %backend_config.kind, "backend configured");
                builder = builder.backend(backend);
            }
        }

        if config.cache.enabled {
            builder = builder.cache(Arc::new(ExactMatchCache::new()));
        }

        Ok(builder)
    }

    /// Register a backend under its own name (replaces a same-named one)
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        let name = backend.name().to_string();
        if self.backends.insert(name.clone(), backend).is_some() {
            warn!(backend = %name, "backend registered twice, keeping the latest");
        }
        self
    }

    /// Set the routing table
    #[must_use]
    pub fn routing(mut self, routing: RoutingTable) -> Self {
        self.routing = routing;
        self
    }

    /// Set the default execution mode
    #[must_use]
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the cooldown period
    #[must_use]
    pub fn cooldown_ttl(mut self, ttl: Duration) -> Self {
        self.cooldown_ttl = ttl;
        self
    }

    /// Attach a semantic cache
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn SemanticCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Detach any semantic cache
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Minimum similarity for cache hits
    #[must_use]
    pub fn min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity.clamp(0.0, 1.0);
        self
    }

    /// Attach a cost recorder
    #[must_use]
    pub fn cost_recorder(mut self, recorder: Arc<dyn CostRecorder>) -> Self {
        self.cost_recorder = Some(recorder);
        self
    }

    /// Bound every cache and cost recorder call
    #[must_use]
    pub fn collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Build the router; fails when no backend is configured
    pub fn build(self) -> Result<GenerationRouter, GatewayError> {
        if self.backends.is_empty() {
            return Err(GatewayError::NoBackendsAvailable(
                "no backend is enabled with credentials present".to_string(),
            ));
        }

        info!(
            backends = ?self.backends.keys().collect::<Vec<_>>(),
            mode = %self.mode,
            cache = self.cache.is_some(),
            "generation router ready"
        );

        Ok(GenerationRouter {
            backends: self.backends,
            policy: RoutingPolicy::new(self.routing.clone()),
            fallback: FallbackPlanner::new(self.routing.fallbacks),
            cooldowns: Arc::new(CooldownTracker::new(self.cooldown_ttl)),
            mode: self.mode,
            cache: self.cache,
            min_similarity: self.min_similarity,
            cost_recorder: self.cost_recorder,
            collaborator_timeout: self.collaborator_timeout,
            metrics: Arc::new(RouterMetrics::new()),
            closed: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routes generation requests across backends
pub struct GenerationRouter {
    backends: BTreeMap<String, Arc<dyn Backend>>,
    policy: RoutingPolicy,
    fallback: FallbackPlanner,
    cooldowns: Arc<CooldownTracker>,
    mode: ExecutionMode,
    cache: Option<Arc<dyn SemanticCache>>,
    min_similarity: f32,
    cost_recorder: Option<Arc<dyn CostRecorder>>,
    collaborator_timeout: Duration,
    metrics: Arc<RouterMetrics>,
    closed: AtomicBool,
}

impl GenerationRouter {
    /// Start building a router
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Default execution mode
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Configured backend names, sorted
    #[must_use]
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Backend by name
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.get(name)
    }

    /// Cooldown tracker
    #[must_use]
    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Router metrics
    #[must_use]
    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Current availability of every configured backend
    #[must_use]
    pub fn availability(&self) -> Availability {
        self.backends
            .keys()
            .map(|name| (name.as_str(), self.cooldowns.is_available(name)))
            .collect()
    }

    /// Routing decision the router would make right now
    #[must_use]
    pub fn decide(&self, mode: ExecutionMode, step: &Step) -> Option<RoutingDecision> {
        self.policy.select(mode, step, &self.availability())
    }

    /// Execute in the router's default mode
    pub async fn execute(&self, request: &GenerationRequest, step: &Step) -> GenerationResult {
        self.execute_in(self.mode, request, step).await
    }

    /// Execute in an explicit mode
    pub async fn execute_in(
        &self,
        mode: ExecutionMode,
        request: &GenerationRequest,
        step: &Step,
    ) -> GenerationResult {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate", %request_id, step = %step.id, %mode);
        self.route(mode, request, step).instrument(span).await
    }

    async fn route(
        &self,
        mode: ExecutionMode,
        request: &GenerationRequest,
        step: &Step,
    ) -> GenerationResult {
        let started = Instant::now();
        self.metrics.requests.inc();

        if self.closed.load(Ordering::Acquire) {
            return self.finish(
                GenerationResult::failure(
                    "router",
                    GenerationError::new(ErrorKind::TransportError, "router is closed"),
                    0,
                ),
                started,
            );
        }

        let Some((decision, primary)) = self
            .decide(mode, step)
            .and_then(|d| self.backends.get(&d.primary).cloned().map(|b| (d, b)))
        else {
            return self.finish(
                GenerationResult::failure(
                    "router",
                    GenerationError::new(ErrorKind::NoBackendsAvailable, "no backend could service the request"),
                    0,
                ),
                started,
            );
        };

        match &decision.reason {
            RoutingReason::CooledDown { preferred } => {
                warn!(preferred = %preferred, substitute = %decision.primary, "preferred backend cooling down");
            }
            RoutingReason::AllCoolingDown => {
                warn!(backend = %decision.primary, "every candidate is cooling down, using preferred anyway");
            }
            _ => debug!(decision = %decision, "routed"),
        }

        let namespace = request.cache_namespace().unwrap_or(DEFAULT_NAMESPACE);
        if let Some(hit) = self.cache_lookup(request.prompt(), namespace).await {
            self.metrics.cache_hits.inc();
            let result = GenerationResult::cache_hit(hit.text, elapsed_ms(started));
            self.report_cost(mode, &step.id, &result).await;
            return self.finish(result, started);
        }

        let mut result = primary.generate_in(mode, request).await;

        if result.is_rate_limit_exhaustion() {
            result = self.fall_back(mode, request, &decision.primary, result).await;
        }

        if result.success {
            self.cache_store(request.prompt(), namespace, step, &result).await;
            self.report_cost(mode, &step.id, &result).await;

            if let Some(audit) = &decision.audit {
                result.audit = self
                    .audit(mode, request, step, audit, &result.text)
                    .await
                    .map(Box::new);
            }
        } else if let Some(error) = &result.error {
            warn!(backend = %result.backend, kind = %error.kind, error = %error.message, "generation failed");
        }

        self.finish(result, started)
    }

    /// Cooldown + single fallback hop after rate-limit exhaustion
    async fn fall_back(
        &self,
        mode: ExecutionMode,
        request: &GenerationRequest,
        failed: &str,
        result: GenerationResult,
    ) -> GenerationResult {
        self.mark_cooling(failed);

        match self.fallback.resolve(mode, failed, &self.availability()) {
            FallbackResolution::NotDefined => result,
            FallbackResolution::Unavailable { candidates } => {
                warn!(backend = failed, ?candidates, "no fallback target available");
                let last = result
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or_default();
                GenerationResult::failure(
                    failed,
                    GenerationError::new(
                        ErrorKind::NoFallbackAvailable,
                        format!(
                            "{failed} exhausted on rate limits and no fallback target is available ({}); {last}",
                            candidates.join(", ")
                        ),
                    )
                    .with_last_failure(ErrorKind::RateLimited),
                    result.elapsed_ms,
                )
            }
            FallbackResolution::Target(target) => {
                let Some(backend) = self.backends.get(&target) else {
                    return result;
                };
                info!(from = failed, to = %target, "falling back after rate-limit exhaustion");
                self.metrics.fallbacks.inc();

                let mut fallback = backend.generate_in(mode, request).await;
                if fallback.is_rate_limit_exhaustion() {
                    self.mark_cooling(&target);
                }
                fallback.fallback_from = Some(failed.to_string());
                fallback
            }
        }
    }

    /// Second-opinion generation on the audit backend
    async fn audit(
        &self,
        mode: ExecutionMode,
        request: &GenerationRequest,
        step: &Step,
        audit_backend: &str,
        output: &str,
    ) -> Option<GenerationResult> {
        let backend = self.backends.get(audit_backend)?;
        let audit_request = GenerationRequest::new(audit_prompt(step, output))
            .with_max_tokens(request.max_tokens())
            .with_temperature(0.0);

        self.metrics.audits.inc();
        let result = backend.generate_in(mode, &audit_request).await;

        if result.success {
            self.report_cost(mode, &step.id, &result).await;
        } else {
            if result.is_rate_limit_exhaustion() {
                self.mark_cooling(audit_backend);
            }
            warn!(backend = audit_backend, error = ?result.error, "audit failed");
        }
        Some(result)
    }

    fn mark_cooling(&self, backend: &str) {
        self.cooldowns.mark_limited(backend);
        self.metrics.cooldowns.inc();
        warn!(backend, ttl_secs = self.cooldowns.ttl().as_secs(), "backend cooling down after rate-limit exhaustion");
    }

    async fn cache_lookup(&self, prompt: &str, namespace: &str) -> Option<CacheHit> {
        let cache = self.cache.as_ref()?;
        let Ok(lookup) = timeout(self.collaborator_timeout, cache.get(prompt, namespace)).await
        else {
            warn!(timeout_ms = millis(self.collaborator_timeout), "cache lookup timed out, treating as miss");
            return None;
        };
        match lookup {
            Ok(Some(hit)) if hit.similarity >= self.min_similarity => {
                debug!(namespace, similarity = hit.similarity, "cache hit");
                Some(hit)
            }
            Ok(Some(hit)) => {
                debug!(namespace, similarity = hit.similarity, "cache hit below threshold");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn cache_store(
        &self,
        prompt: &str,
        namespace: &str,
        step: &Step,
        result: &GenerationResult,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };
        let metadata = serde_json::json!({
            "backend": result.backend,
            "step_id": step.id,
            "step_type": step.step_type,
            "output_tokens": result.output_tokens,
        });
        match timeout(
            self.collaborator_timeout,
            cache.put(prompt, &result.text, metadata, namespace),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "cache store failed"),
            Err(_) => warn!(timeout_ms = millis(self.collaborator_timeout), "cache store timed out"),
        }
    }

    async fn report_cost(&self, mode: ExecutionMode, step_id: &str, result: &GenerationResult) {
        let Some(recorder) = &self.cost_recorder else {
            return;
        };
        let entry = CostEntry {
            backend: result.backend_name().to_string(),
            mode,
            step_id: step_id.to_string(),
            cost_usd: result.cost_usd,
            tokens_in: result.input_tokens,
            tokens_out: result.output_tokens,
            elapsed_ms: result.elapsed_ms,
            cached: result.cached,
            recorded_at: Utc::now(),
        };
        match timeout(self.collaborator_timeout, recorder.record(entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "cost recording failed"),
            Err(_) => warn!(timeout_ms = millis(self.collaborator_timeout), "cost recording timed out"),
        }
    }

    fn finish(&self, mut result: GenerationResult, started: Instant) -> GenerationResult {
        result.elapsed_ms = elapsed_ms(started);
        self.metrics.latency.record(result.elapsed_ms);
        if result.success {
            self.metrics.successes.inc();
            self.metrics.record_serviced(result.backend_name());
        } else {
            self.metrics.failures.inc();
        }
        result
    }

    /// Close every backend. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        join_all(self.backends.values().map(|backend| backend.close())).await;
        info!(backends = self.backends.len(), "generation router closed");
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn audit_prompt(step: &Step, output: &str) -> String {
    let mut prompt = format!(
        "You are auditing the output of step \"{}\" ({}).\n",
        step.id, step.step_type
    );
    if !step.description.is_empty() {
        prompt.push_str(&format!("Step description: {}\n", step.description));
    }
    if !step.validation_criteria.is_empty() {
        prompt.push_str("Validation criteria:\n");
        for criterion in &step.validation_criteria {
            prompt.push_str(&format!("- {criterion}\n"));
        }
    }
    prompt.push_str("\nOutput under review:\n");
    prompt.push_str(output);
    prompt.push_str(
        "\n\nList every defect you find. Reply APPROVED if the output satisfies every criterion.",
    );
    prompt
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::config::{FallbackTable, ModelCatalog};
    use crate::routing::test_utils::{fail, ScriptedBackend};
    use crate::step::StepType;

    fn table() -> RoutingTable {
        RoutingTable {
            fast: "fast".to_string(),
            balanced: "balanced".to_string(),
            specialist: None,
            audit: Some("auditor".to_string()),
            priority: vec!["fast".to_string(), "balanced".to_string(), "auditor".to_string()],
            fallbacks: FallbackTable {
                fast: vec!["balanced".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_build_without_backends_fails() {
        let err = RouterBuilder::new().build().err().unwrap();
        assert!(matches!(err, GatewayError::NoBackendsAvailable(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_marks_cooldown_and_falls_back() {
        let router = RouterBuilder::new()
            .routing(table())
            .mode(ExecutionMode::Fast)
            .backend(Arc::new(
                ScriptedBackend::named("fast").with_default(fail(ErrorKind::RateLimited)),
            ))
            .backend(Arc::new(ScriptedBackend::named("balanced")))
            .build()
            .unwrap();

        let step = Step::new("s1", StepType::CodeGeneration);
        let result = router.execute(&GenerationRequest::new("p"), &step).await;

        assert!(result.success);
        assert_eq!(result.backend, "balanced:balanced-model");
        assert_eq!(result.fallback_from.as_deref(), Some("fast"));
        assert!(!router.cooldowns().is_available("fast"));
        assert_eq!(router.metrics().snapshot().fallbacks, 1);

        // Next request routes around the cooling backend without touching it
        let result = router.execute(&GenerationRequest::new("q"), &step).await;
        assert_eq!(result.backend, "balanced:balanced-model");
        assert_eq!(result.fallback_from, None);
    }

    #[tokio::test]
    async fn test_audit_attached_for_review_steps() {
        let auditor = Arc::new(ScriptedBackend::new("auditor", ModelCatalog::single("judge")));
        let router = RouterBuilder::new()
            .routing(table())
            .mode(ExecutionMode::DoubleCheck)
            .backend(Arc::new(ScriptedBackend::named("balanced")))
            .backend(auditor.clone())
            .build()
            .unwrap();

        let step = Step::new("s9", StepType::Review)
            .with_description("check the lexer")
            .with_criterion("no panics");
        let result = router.execute(&GenerationRequest::new("p"), &step).await;

        assert!(result.success);
        let audit = result.audit.expect("audit attached");
        assert_eq!(audit.backend, "auditor:judge");

        let prompt = &auditor.prompts()[0];
        assert!(prompt.contains("check the lexer"));
        assert!(prompt.contains("- no panics"));
        assert!(prompt.contains("ok from balanced"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::named("balanced"));
        let router = RouterBuilder::new()
            .routing(table())
            .backend(backend.clone())
            .build()
            .unwrap();

        router.close().await;
        router.close().await;

        assert!(router.is_closed());
        assert_eq!(backend.close_count(), 1);

        let result = router
            .execute(&GenerationRequest::new("p"), &Step::new("s", StepType::Patch))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::TransportError));
    }

    struct StalledRecorder;

    #[async_trait::async_trait]
    impl CostRecorder for StalledRecorder {
        async fn record(&self, _entry: CostEntry) -> anyhow::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_cost_recorder_is_abandoned() {
        let router = RouterBuilder::new()
            .routing(table())
            .backend(Arc::new(ScriptedBackend::named("balanced")))
            .cost_recorder(Arc::new(StalledRecorder))
            .collaborator_timeout(Duration::from_millis(250))
            .build()
            .unwrap();

        let started = Instant::now();
        let result = router
            .execute(&GenerationRequest::new("p"), &Step::new("s", StepType::Patch))
            .await;

        assert!(result.success);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(250) && waited < Duration::from_secs(1));
    }

    #[test]
    fn test_audit_prompt_shape() {
        let step = Step::new("s2", StepType::Validation).with_criterion("compiles");
        let prompt = audit_prompt(&step, "fn main() {}");
        assert!(prompt.starts_with("You are auditing the output of step \"s2\" (validation)."));
        assert!(prompt.contains("- compiles"));
        assert!(prompt.contains("fn main() {}"));
    }
}

//! Backend Traits
//!
//! The request/result value types and the [`Backend`] trait every provider
//! client implements.
//!
//! # Design
//!
//! A backend implements exactly one provider call: [`Backend::attempt`] sends
//! one request to one model and classifies the failure. Everything above that
//! (model cascade, retries, backoff, usage accounting) is provided by the
//! trait on top of [`CascadeExecutor`], so every client gets identical
//! retry semantics.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::profile::BackendProfile;
use super::usage::UsageCounters;
use crate::error::{ErrorKind, GenerationError};
use crate::routing::cascade::{CascadeExecutor, ModelCascade};
use crate::routing::config::{
    BackendKind, ExecutionMode, ModelCatalog, Pricing, RetryConfig, Specialty,
};

/// Default output budget when the caller does not set one
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

// ============================================================================
// Request
// ============================================================================

/// Restriction on the shape of generated output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputConstraint {
    /// No restriction
    #[default]
    None,
    /// Only source code
    CodeOnly,
    /// Only a JSON document
    JsonOnly,
    /// No explanatory prose around the answer
    NoProse,
}

impl OutputConstraint {
    /// System instruction prepended by every client, if any
    #[must_use]
    pub fn instruction(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::CodeOnly => Some(
                "Respond with source code only. Do not include explanations or markdown fences.",
            ),
            Self::JsonOnly => Some("Respond with a single valid JSON document and nothing else."),
            Self::NoProse => Some("Respond with the answer only. Do not add commentary."),
        }
    }
}

impl std::str::FromStr for OutputConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "code_only" | "code" => Ok(Self::CodeOnly),
            "json_only" | "json" => Ok(Self::JsonOnly),
            "no_prose" => Ok(Self::NoProse),
            other => Err(format!("unknown output constraint: {other}")),
        }
    }
}

/// A single generation request
///
/// Immutable once built: fields are private and the `with_*` builders consume
/// and return the request.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    context: Option<String>,
    max_tokens: u32,
    temperature: f32,
    constraint: OutputConstraint,
    cache_namespace: Option<String>,
}

impl GenerationRequest {
    /// Create a request with default budget and temperature
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            constraint: OutputConstraint::None,
            cache_namespace: None,
        }
    }

    /// Replace the prompt, keeping every other setting
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set supporting context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = (!context.is_empty()).then_some(context);
        self
    }

    /// Set max output tokens (at least 1)
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    /// Set temperature (each provider clamps to its own range)
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = if temperature.is_nan() {
            DEFAULT_TEMPERATURE
        } else {
            temperature
        };
        self
    }

    /// Set output constraint
    #[must_use]
    pub fn with_constraint(mut self, constraint: OutputConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    /// Set the cache namespace
    #[must_use]
    pub fn with_cache_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.cache_namespace = Some(namespace.into());
        self
    }

    /// Prompt text
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Supporting context
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Max output tokens
    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Requested temperature, unclamped
    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Temperature clamped into a provider's range
    #[must_use]
    pub fn temperature_in(&self, min: f32, max: f32) -> f32 {
        self.temperature.clamp(min, max)
    }

    /// Output constraint
    #[must_use]
    pub fn constraint(&self) -> OutputConstraint {
        self.constraint
    }

    /// Cache namespace
    #[must_use]
    pub fn cache_namespace(&self) -> Option<&str> {
        self.cache_namespace.as_deref()
    }

    /// System instruction derived from the output constraint
    #[must_use]
    pub fn system_instruction(&self) -> Option<&'static str> {
        self.constraint.instruction()
    }

    /// User-turn content: context (if any) followed by the prompt
    #[must_use]
    pub fn user_content(&self) -> String {
        match &self.context {
            Some(context) => format!("{context}\n\n{}", self.prompt),
            None => self.prompt.clone(),
        }
    }
}

// ============================================================================
// Result
// ============================================================================

/// Outcome of one generation request
///
/// Produced exactly once per request. On failure, text is empty and tokens
/// and cost are zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Whether generation succeeded
    pub success: bool,
    /// Generated text
    pub text: String,
    /// Prompt tokens
    pub input_tokens: u32,
    /// Completion tokens
    pub output_tokens: u32,
    /// Input plus output tokens
    pub total_tokens: u32,
    /// Cost in USD
    pub cost_usd: f64,
    /// Wall-clock time in milliseconds
    pub elapsed_ms: u64,
    /// Classified failure, when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationError>,
    /// Backend that serviced the request (`<backend>:<model>` on success)
    pub backend: String,
    /// Served from the semantic cache
    #[serde(default)]
    pub cached: bool,
    /// Primary backend name when a fallback hop serviced the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_from: Option<String>,
    /// Second-opinion audit result (DOUBLE-CHECK mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<Box<GenerationResult>>,
}

impl GenerationResult {
    /// Successful result from a completion
    pub fn success(
        backend: impl Into<String>,
        completion: Completion,
        cost_usd: f64,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            success: true,
            text: completion.text,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            total_tokens: completion.input_tokens.saturating_add(completion.output_tokens),
            cost_usd: cost_usd.max(0.0),
            elapsed_ms,
            error: None,
            backend: backend.into(),
            cached: false,
            fallback_from: None,
            audit: None,
        }
    }

    /// Failed result; text, tokens and cost are zeroed
    pub fn failure(backend: impl Into<String>, error: GenerationError, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            text: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            elapsed_ms,
            error: Some(error),
            backend: backend.into(),
            cached: false,
            fallback_from: None,
            audit: None,
        }
    }

    /// Zero-cost, zero-token result served from the cache
    pub fn cache_hit(text: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            text: text.into(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            elapsed_ms,
            error: None,
            backend: "cache".to_string(),
            cached: true,
            fallback_from: None,
            audit: None,
        }
    }

    /// Classified error kind, if failed
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Whether this failure is a rate-limit-classified exhaustion
    #[must_use]
    pub fn is_rate_limit_exhaustion(&self) -> bool {
        !self.success && self.error.as_ref().is_some_and(GenerationError::is_rate_limited)
    }

    /// Backend name without the `:<model>` suffix
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend
            .split_once(':')
            .map_or(self.backend.as_str(), |(name, _)| name)
    }
}

// ============================================================================
// Single-attempt primitives
// ============================================================================

/// Raw output of one successful provider call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Prompt tokens reported (or estimated)
    pub input_tokens: u32,
    /// Completion tokens reported (or estimated)
    pub output_tokens: u32,
}

impl Completion {
    /// Create a completion
    pub fn new(text: impl Into<String>, input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            text: text.into(),
            input_tokens,
            output_tokens,
        }
    }
}

/// Classified failure of one provider call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Detail for logs and the final error message
    pub message: String,
    /// HTTP status, when one was received
    pub status: Option<u16>,
}

impl AttemptError {
    /// Create an error without an HTTP status
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Attach the HTTP status
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Transport-level failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    /// Provider returned something unusable
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendServerError, message)
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for AttemptError {}

/// Rough token estimate for providers that omit usage (4 chars per token)
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

// ============================================================================
// Backend trait
// ============================================================================

/// A text-generation provider
///
/// One instance per configured credential, shared across concurrent requests.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Static description: name, kind, models, pricing, retry policy, counters
    fn profile(&self) -> &BackendProfile;

    /// Perform exactly one provider call against one model
    async fn attempt(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<Completion, AttemptError>;

    /// Release transport resources. Idempotent; later attempts fail as
    /// transport errors.
    async fn close(&self);

    /// Backend name
    fn name(&self) -> &str {
        &self.profile().name
    }

    /// Backend variant
    fn kind(&self) -> BackendKind {
        self.profile().kind
    }

    /// Declared specialties
    fn specialties(&self) -> &[Specialty] {
        &self.profile().specialties
    }

    /// Token pricing
    fn pricing(&self) -> Pricing {
        self.profile().pricing
    }

    /// Configured models
    fn models(&self) -> &ModelCatalog {
        &self.profile().models
    }

    /// Retry budget and backoff policies
    fn retry_config(&self) -> &RetryConfig {
        &self.profile().retry
    }

    /// Cumulative usage counters
    fn usage(&self) -> &UsageCounters {
        &self.profile().usage
    }

    /// Model cascade for an execution mode
    fn cascade(&self, mode: ExecutionMode) -> ModelCascade {
        self.models().cascade_for(mode)
    }

    /// Generate with the BUILD-mode cascade
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        self.generate_in(ExecutionMode::Build, request).await
    }

    /// Generate with the cascade for `mode`
    async fn generate_in(
        &self,
        mode: ExecutionMode,
        request: &GenerationRequest,
    ) -> GenerationResult {
        let cascade = self.cascade(mode);
        CascadeExecutor::new(self.retry_config().clone())
            .run(self, &cascade, request)
            .await
    }
}

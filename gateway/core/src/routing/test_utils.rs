//! Routing Test Utilities
//!
//! A scripted backend for exercising cascades, routing and fallback without
//! network calls. Each model has a queue of outcomes; once a queue is empty
//! the backend's default outcome is returned.
//!
//! # Usage
//!
//! ```ignore
//! let backend = ScriptedBackend::new("groq", ModelCatalog::single("m1"))
//!     .script("m1", vec![fail(ErrorKind::RateLimited), ok("done", 10, 5)]);
//!
//! let result = backend.generate(&GenerationRequest::new("hi")).await;
//! assert_eq!(backend.calls_for("m1"), 2);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{
    AttemptError, Backend, BackendProfile, Completion, GenerationRequest,
};
use crate::error::ErrorKind;
use crate::routing::config::{BackendKind, ModelCatalog, Pricing, RetryConfig};

/// Outcome of one scripted attempt
pub type Outcome = Result<Completion, AttemptError>;

/// Successful outcome
pub fn ok(text: &str, input_tokens: u32, output_tokens: u32) -> Outcome {
    Ok(Completion::new(text, input_tokens, output_tokens))
}

/// Failed outcome of the given kind
pub fn fail(kind: ErrorKind) -> Outcome {
    Err(AttemptError::new(kind, format!("scripted {kind}")))
}

/// Backend that replays scripted outcomes per model
pub struct ScriptedBackend {
    profile: BackendProfile,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    default_outcome: Mutex<Outcome>,
    calls: Mutex<Vec<(String, String)>>,
    closes: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    /// Backend that answers `"ok from <name>"` unless scripted otherwise
    pub fn new(name: &str, models: ModelCatalog) -> Self {
        let profile = BackendProfile::new(name, BackendKind::QualityCompletion, models)
            .with_retry(RetryConfig::immediate(2));
        let default_outcome = ok(&format!("ok from {name}"), 10, 20);
        Self {
            profile,
            scripts: Mutex::new(HashMap::new()),
            default_outcome: Mutex::new(default_outcome),
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Single-model backend named `name` serving model `"<name>-model"`
    pub fn named(name: &str) -> Self {
        Self::new(name, ModelCatalog::single(format!("{name}-model")))
    }

    /// Queue outcomes for a model
    #[must_use]
    pub fn script(self, model: &str, outcomes: Vec<Outcome>) -> Self {
        self.scripts
            .lock()
            .entry(model.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Outcome once a model's queue is empty
    #[must_use]
    pub fn with_default(self, outcome: Outcome) -> Self {
        *self.default_outcome.lock() = outcome;
        self
    }

    /// Set pricing
    #[must_use]
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.profile.pricing = pricing;
        self
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.profile.retry = retry;
        self
    }

    /// Set backend kind
    #[must_use]
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.profile.kind = kind;
        self.profile.specialties = kind.default_specialties();
        self
    }

    /// Sleep before every attempt
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total attempts
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Attempts against one model
    pub fn calls_for(&self, model: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == model).count()
    }

    /// Prompts received, in order
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    /// Times `close` was called
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    async fn attempt(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<Completion, AttemptError> {
        self.calls
            .lock()
            .push((model.to_string(), request.prompt().to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.default_outcome.lock().clone())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

//! Model Cascade Executor
//!
//! Runs one request against a backend's ordered model list.
//!
//! # State machine
//!
//! ```text
//! TryModel(i, attempt)
//!   ├─ Ok                         -> Success("<backend>:<model>")
//!   ├─ ModelNotFound | ClientError -> NextModel
//!   ├─ RateLimited                 -> attempt < R ? sleep(rate_limit) + RetrySameModel : NextModel
//!   └─ BackendServer | Transport   -> attempt < R ? sleep(server_error) + RetrySameModel : NextModel
//! NextModel past the last model    -> Exhausted(AllModelsExhausted)
//! ```
//!
//! Attempt counters are per model. Models are tried strictly in order and
//! attempts against one model are strictly sequential.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::backend::{AttemptError, Backend, GenerationRequest, GenerationResult};
use crate::error::{ErrorKind, GenerationError};

use super::config::RetryConfig;

// ============================================================================
// Model Cascade
// ============================================================================

/// Ordered, de-duplicated model ids for one backend
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelCascade {
    models: Vec<String>,
}

impl ModelCascade {
    /// Primary first, then `ordering`, skipping blanks and duplicates
    #[must_use]
    pub fn new(primary: &str, ordering: &[String]) -> Self {
        let mut models: Vec<String> = Vec::with_capacity(ordering.len() + 1);
        for model in std::iter::once(primary).chain(ordering.iter().map(String::as_str)) {
            let model = model.trim();
            if !model.is_empty() && !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }
        Self { models }
    }

    /// Models in try order
    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Number of models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the cascade has no models
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

// ============================================================================
// Executor
// ============================================================================

/// One provider call made during a cascade run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Model that was called
    pub model: String,
    /// Per-model attempt index (0-based)
    pub attempt: u32,
    /// Failure kind, `None` on success
    pub kind: Option<ErrorKind>,
    /// Backoff slept before the next attempt on the same model
    pub backoff: Option<Duration>,
}

/// Result of a cascade run plus the attempt trace
#[derive(Clone, Debug)]
pub struct CascadeOutcome {
    /// Final result
    pub result: GenerationResult,
    /// Every provider call, in order
    pub attempts: Vec<AttemptRecord>,
}

/// Drives a [`ModelCascade`] with retry and backoff
#[derive(Clone, Debug)]
pub struct CascadeExecutor {
    retry: RetryConfig,
}

impl CascadeExecutor {
    /// Create an executor with the given retry policy
    #[must_use]
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// Backoff before retrying the same model, or `None` to move on
    fn backoff_for(&self, kind: ErrorKind, attempt: u32) -> Option<Duration> {
        if attempt >= self.retry.max_retries {
            return None;
        }
        match kind {
            ErrorKind::RateLimited => Some(self.retry.rate_limit.delay_for_attempt(attempt)),
            ErrorKind::BackendServerError | ErrorKind::TransportError => {
                Some(self.retry.server_error.delay_for_attempt(attempt))
            }
            _ => None,
        }
    }

    /// Run the cascade and return the final result
    pub async fn run<B: Backend + ?Sized>(
        &self,
        backend: &B,
        cascade: &ModelCascade,
        request: &GenerationRequest,
    ) -> GenerationResult {
        self.run_traced(backend, cascade, request).await.result
    }

    /// Run the cascade and keep the attempt trace
    pub async fn run_traced<B: Backend + ?Sized>(
        &self,
        backend: &B,
        cascade: &ModelCascade,
        request: &GenerationRequest,
    ) -> CascadeOutcome {
        let started = Instant::now();
        let name = backend.name();
        let mut attempts = Vec::new();
        let mut last_error: Option<AttemptError> = None;

        for model in cascade.models() {
            let mut attempt = 0u32;
            loop {
                match backend.attempt(model, request).await {
                    Ok(completion) => {
                        let cost = backend
                            .pricing()
                            .cost(completion.input_tokens, completion.output_tokens);
                        backend.usage().record_success(
                            completion.input_tokens,
                            completion.output_tokens,
                            cost,
                        );
                        debug!(backend = name, model = %model, attempt, "attempt succeeded");
                        attempts.push(AttemptRecord {
                            model: model.clone(),
                            attempt,
                            kind: None,
                            backoff: None,
                        });
                        return CascadeOutcome {
                            result: GenerationResult::success(
                                format!("{name}:{model}"),
                                completion,
                                cost,
                                elapsed_ms(started),
                            ),
                            attempts,
                        };
                    }
                    Err(err) => {
                        let backoff = self.backoff_for(err.kind, attempt);
                        debug!(
                            backend = name,
                            model = %model,
                            attempt,
                            kind = %err.kind,
                            backoff_ms = backoff.map(|d| d.as_millis() as u64),
                            error = %err.message,
                            "attempt failed"
                        );
                        attempts.push(AttemptRecord {
                            model: model.clone(),
                            attempt,
                            kind: Some(err.kind),
                            backoff,
                        });
                        last_error = Some(err);

                        match backoff {
                            Some(delay) => {
                                tokio::time::sleep(delay).await;
                                attempt += 1;
                            }
                            None => break,
                        }
                    }
                }
            }
        }

        backend.usage().record_failure();
        let error = match last_error {
            Some(last) => GenerationError::new(
                ErrorKind::AllModelsExhausted,
                format!(
                    "all {} models tried for backend {name}; last error: {last}",
                    cascade.len()
                ),
            )
            .with_last_failure(last.kind),
            None => GenerationError::new(
                ErrorKind::AllModelsExhausted,
                format!("all 0 models tried for backend {name}; no models configured"),
            ),
        };

        CascadeOutcome {
            result: GenerationResult::failure(name, error, elapsed_ms(started)),
            attempts,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

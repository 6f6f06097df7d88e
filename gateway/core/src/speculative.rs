//! Speculative Decoder
//!
//! Draft-then-verify acceleration across two backends: a fast backend drafts
//! a bounded answer, a capable backend verifies and produces the final text
//! with the draft in view.
//!
//! # Scoring
//!
//! Agreement is a documented approximation, not token-level speculative
//! decoding: both texts are split on whitespace and the leading
//! `min(draft, verify, window)` tokens are compared positionally.
//!
//! ```text
//! accept_rate = matches / compared * 100      (0 when nothing to compare)
//! speedup     = verify_ms * 1.2 / total_ms    (1.0 when total_ms is 0)
//! ```
//!
//! The returned text is always the verify output.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::{Backend, GenerationRequest, GenerationResult};
use crate::config::SpeculativeConfig;
use crate::error::GatewayError;
use crate::routing::config::ExecutionMode;
use crate::routing::router::GenerationRouter;

/// Verify-phase weight in the speedup estimate
const SPEEDUP_FACTOR: f64 = 1.2;

/// Outcome of one speculative decode
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpeculativeResult {
    /// Final result (the verify output)
    pub result: GenerationResult,
    /// Backend id that drafted
    pub draft_backend: String,
    /// Backend id that verified
    pub verify_backend: String,
    /// Draft phase duration
    pub draft_ms: u64,
    /// Verify phase duration
    pub verify_ms: u64,
    /// End-to-end duration
    pub total_ms: u64,
    /// Whitespace tokens in the draft
    pub draft_tokens: usize,
    /// Draft tokens that matched the verify output
    pub accepted_tokens: usize,
    /// Draft tokens that did not
    pub rejected_tokens: usize,
    /// Percentage of compared tokens that matched (0 - 100)
    pub accept_rate: f64,
    /// Estimated speedup over verify-only generation
    pub speedup: f64,
    /// Cost of the draft phase in USD
    pub draft_cost_usd: f64,
}

impl SpeculativeResult {
    /// Draft plus verify cost
    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.draft_cost_usd + self.result.cost_usd
    }
}

/// Positional agreement between draft and verify output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenAgreement {
    /// Whitespace tokens in the draft
    pub draft_tokens: usize,
    /// Whitespace tokens in the verify output
    pub verify_tokens: usize,
    /// Tokens compared
    pub compared: usize,
    /// Positions where both agree
    pub matches: usize,
}

impl TokenAgreement {
    /// Compare the leading `window` whitespace tokens of both texts
    #[must_use]
    pub fn score(draft: &str, verify: &str, window: usize) -> Self {
        let draft: Vec<&str> = draft.split_whitespace().collect();
        let verify: Vec<&str> = verify.split_whitespace().collect();
        let compared = draft.len().min(verify.len()).min(window);
        let matches = draft
            .iter()
            .zip(verify.iter())
            .take(compared)
            .filter(|(d, v)| d == v)
            .count();

        Self {
            draft_tokens: draft.len(),
            verify_tokens: verify.len(),
            compared,
            matches,
        }
    }

    /// `matches / compared * 100`, or 0 when nothing was compared
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accept_rate(&self) -> f64 {
        if self.compared == 0 {
            0.0
        } else {
            self.matches as f64 / self.compared as f64 * 100.0
        }
    }
}

/// Estimated speedup, never negative; 1.0 when no time elapsed
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_speedup(verify_ms: u64, total_ms: u64) -> f64 {
    if total_ms == 0 {
        return 1.0;
    }
    (verify_ms as f64 * SPEEDUP_FACTOR / total_ms as f64).max(0.0)
}

fn verify_prompt(prompt: &str, draft: &str) -> String {
    format!(
        "{prompt}\n\nA draft answer follows. Check it carefully and write the final, \
         corrected answer in full. Keep whatever the draft got right.\n\nDraft:\n{draft}"
    )
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Draft + verify decoder over two backends
pub struct SpeculativeDecoder {
    draft: Arc<dyn Backend>,
    verify: Arc<dyn Backend>,
    config: SpeculativeConfig,
}

impl SpeculativeDecoder {
    /// Create a decoder
    #[must_use]
    pub fn new(draft: Arc<dyn Backend>, verify: Arc<dyn Backend>, config: SpeculativeConfig) -> Self {
        Self {
            draft,
            verify,
            config,
        }
    }

    /// Create a decoder over backends owned by a router
    pub fn from_router(
        router: &GenerationRouter,
        config: &SpeculativeConfig,
    ) -> Result<Self, GatewayError> {
        let lookup = |name: &str| {
            router
                .backend(name)
                .cloned()
                .ok_or_else(|| GatewayError::UnknownBackend(name.to_string()))
        };
        Ok(Self::new(
            lookup(&config.draft_backend)?,
            lookup(&config.verify_backend)?,
            config.clone(),
        ))
    }

    fn draft_request(&self, request: &GenerationRequest) -> GenerationRequest {
        request
            .clone()
            .with_max_tokens(request.max_tokens().min(self.config.draft_max_tokens))
    }

    /// Draft, then verify, sequentially
    pub async fn decode(&self, request: &GenerationRequest) -> SpeculativeResult {
        let started = Instant::now();
        let draft = self
            .draft
            .generate_in(ExecutionMode::Fast, &self.draft_request(request))
            .await;
        let draft_ms = elapsed_ms(started);
        self.verify_phase(request, started, Some(draft), draft_ms).await
    }

    /// Draft on a spawned task, bounded by the draft timeout
    ///
    /// A draft that does not finish in time is aborted and the decode
    /// proceeds verify-only.
    pub async fn decode_parallel(&self, request: &GenerationRequest) -> SpeculativeResult {
        let started = Instant::now();
        let backend = Arc::clone(&self.draft);
        let draft_request = self.draft_request(request);

        let mut handle = tokio::spawn(async move {
            backend
                .generate_in(ExecutionMode::Fast, &draft_request)
                .await
        });

        let draft = match tokio::time::timeout(self.config.draft_timeout(), &mut handle).await {
            Ok(Ok(draft)) => Some(draft),
            Ok(Err(e)) => {
                warn!(error = %e, "draft task failed");
                None
            }
            Err(_) => {
                handle.abort();
                warn!(
                    timeout_ms = self.config.draft_timeout_ms,
                    "draft timed out, verifying without it"
                );
                None
            }
        };
        let draft_ms = elapsed_ms(started);
        self.verify_phase(request, started, draft, draft_ms).await
    }

    async fn verify_phase(
        &self,
        request: &GenerationRequest,
        started: Instant,
        draft: Option<GenerationResult>,
        draft_ms: u64,
    ) -> SpeculativeResult {
        let draft_backend = draft
            .as_ref()
            .map_or_else(|| self.draft.name().to_string(), |d| d.backend.clone());
        let draft_cost_usd = draft.as_ref().map_or(0.0, |d| d.cost_usd);
        let usable = draft.filter(|d| d.success && !d.text.trim().is_empty());

        let verify_started = Instant::now();
        let Some(draft) = usable else {
            debug!(draft_backend = %draft_backend, "draft empty or failed, verify-only");
            let mut result = self.verify.generate_in(ExecutionMode::Build, request).await;
            let verify_ms = elapsed_ms(verify_started);
            let total_ms = elapsed_ms(started);
            result.elapsed_ms = total_ms;
            return SpeculativeResult {
                verify_backend: result.backend.clone(),
                result,
                draft_backend,
                draft_ms,
                verify_ms,
                total_ms,
                draft_tokens: 0,
                accepted_tokens: 0,
                rejected_tokens: 0,
                accept_rate: 0.0,
                speedup: 1.0,
                draft_cost_usd,
            };
        };

        let verify_request = request
            .clone()
            .with_prompt(verify_prompt(request.prompt(), &draft.text));
        let mut result = self
            .verify
            .generate_in(ExecutionMode::Build, &verify_request)
            .await;
        let verify_ms = elapsed_ms(verify_started);
        let total_ms = elapsed_ms(started);
        result.elapsed_ms = total_ms;

        let agreement = TokenAgreement::score(&draft.text, &result.text, self.config.compare_window);
        let draft_tokens = agreement.draft_tokens;

        let (accepted, accept_rate, speedup) = if result.success {
            (
                agreement.matches,
                agreement.accept_rate(),
                estimate_speedup(verify_ms, total_ms),
            )
        } else {
            warn!(verify_backend = %result.backend, error = ?result.error, "verify failed");
            (0, 0.0, 0.0)
        };

        debug!(
            draft_tokens,
            accepted,
            accept_rate,
            speedup,
            "speculative decode complete"
        );

        SpeculativeResult {
            verify_backend: result.backend.clone(),
            result,
            draft_backend,
            draft_ms,
            verify_ms,
            total_ms,
            draft_tokens,
            accepted_tokens: accepted,
            rejected_tokens: draft_tokens - accepted,
            accept_rate,
            speedup,
            draft_cost_usd,
        }
    }
}

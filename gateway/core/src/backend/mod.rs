//! Backend Integration
//!
//! Provider clients behind the common [`Backend`] trait.
//!
//! # Available Backends
//!
//! - **OpenAI-compatible**: fast, quality and vision completion families
//! - **Anthropic**: messages API
//! - **Ollama**: local inference server
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::backend::{create_backend, Backend, GenerationRequest};
//!
//! let backend = create_backend(&config, timeout, &retry)?.expect("credentials present");
//! let result = backend.generate(&GenerationRequest::new("Hello!")).await;
//! ```

mod anthropic;
mod http;
mod ollama;
mod openai;
mod profile;
mod traits;
mod usage;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

pub use anthropic::AnthropicBackend;
pub use http::{classify_status, classify_transport, HttpTransport, CONNECT_TIMEOUT};
pub use ollama::OllamaBackend;
pub use openai::OpenAiCompatBackend;
pub use profile::BackendProfile;
pub use traits::{
    estimate_tokens, AttemptError, Backend, Completion, GenerationRequest, GenerationResult,
    OutputConstraint, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
pub use usage::{UsageCounters, UsageSnapshot};

use crate::error::GatewayError;
use crate::routing::config::{BackendConfig, Protocol, RetryConfig};

/// Construct the client for one backend config
///
/// Returns `Ok(None)` when the backend is disabled or its credential is
/// missing; such backends are simply not configured.
pub fn create_backend(
    config: &BackendConfig,
    request_timeout: Duration,
    default_retry: &RetryConfig,
) -> Result<Option<Arc<dyn Backend>>, GatewayError> {
    if !config.enabled {
        debug!(backend = %config.name, "backend disabled");
        return Ok(None);
    }

    let api_key = if config.protocol.requires_api_key() {
        match config.resolve_api_key() {
            Some(key) => key,
            None => {
                debug!(
                    backend = %config.name,
                    env = config.api_key_env.as_deref().unwrap_or("<unset>"),
                    "credential missing, backend not configured"
                );
                return Ok(None);
            }
        }
    } else {
        String::new()
    };

    let profile = BackendProfile::from_config(config, default_retry);
    let base_url = config.effective_base_url();

    let backend: Arc<dyn Backend> = match config.protocol {
        Protocol::OpenAi => Arc::new(
            OpenAiCompatBackend::new(profile, base_url, api_key, request_timeout)?
                .with_json_mode(config.json_mode),
        ),
        Protocol::Anthropic => Arc::new(AnthropicBackend::new(
            profile,
            base_url,
            api_key,
            request_timeout,
        )?),
        Protocol::Ollama => Arc::new(OllamaBackend::new(profile, base_url, request_timeout)?),
    };

    Ok(Some(backend))
}

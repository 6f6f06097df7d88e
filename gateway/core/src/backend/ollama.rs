//! Ollama Backend Implementation
//!
//! Local inference backend for Ollama.
//!
//! # Ollama API
//!
//! Uses the non-streaming generate endpoint:
//! - `/api/generate` with `stream: false`
//! - `options.num_predict` carries the output budget
//! - `prompt_eval_count` / `eval_count` report token usage
//!
//! Ollama needs no credentials.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{send_json, HttpTransport};
use super::profile::BackendProfile;
use super::traits::{estimate_tokens, AttemptError, Backend, Completion, GenerationRequest};
use crate::error::GatewayError;

const MIN_TEMPERATURE: f32 = 0.0;
const MAX_TEMPERATURE: f32 = 2.0;

/// Ollama backend client
#[derive(Debug)]
pub struct OllamaBackend {
    profile: BackendProfile,
    base_url: String,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'static str>,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(
        profile: BackendProfile,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(&profile.name, request_timeout)?;
        Ok(Self {
            profile,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
        })
    }

    /// Get generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn build_body<'a>(model: &'a str, request: &GenerationRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            model,
            prompt: request.user_content(),
            stream: false,
            system: request.system_instruction(),
            options: GenerateOptions {
                temperature: request.temperature_in(MIN_TEMPERATURE, MAX_TEMPERATURE),
                num_predict: request.max_tokens(),
            },
        }
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    async fn attempt(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<Completion, AttemptError> {
        let client = self.transport.client()?;
        let body = Self::build_body(model, request);

        let data: GenerateResponse =
            send_json(client.post(self.generate_url()).json(&body)).await?;

        let text = data
            .response
            .ok_or_else(|| AttemptError::server("response field missing"))?;

        let input_tokens = data
            .prompt_eval_count
            .unwrap_or_else(|| estimate_tokens(&body.prompt));
        let output_tokens = data.eval_count.unwrap_or_else(|| estimate_tokens(&text));

        Ok(Completion {
            text,
            input_tokens,
            output_tokens,
        })
    }

    async fn close(&self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::config::{BackendKind, ModelCatalog};

    #[test]
    fn test_ollama_backend_creation() {
        let profile = BackendProfile::new(
            "ollama",
            BackendKind::LocalInference,
            ModelCatalog::single("qwen2.5-coder:7b"),
        );
        let backend =
            OllamaBackend::new(profile, "http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.generate_url(), "http://localhost:11434/api/generate");
    }

    #[test]
    fn test_build_body() {
        // Simple prompt
        let request = GenerationRequest::new("Hello").with_max_tokens(32);
        let body = serde_json::to_value(OllamaBackend::build_body("qwen", &request)).unwrap();
        assert_eq!(body["prompt"], "Hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 32);
        assert!(body.get("system").is_none());

        // With context
        let request = GenerationRequest::new("Hello").with_context("Previous: Hi");
        let body = OllamaBackend::build_body("qwen", &request);
        assert_eq!(body.prompt, "Previous: Hi\n\nHello");
    }
}

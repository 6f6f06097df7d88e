//! OpenAI-Compatible Backend
//!
//! Client for providers speaking the OpenAI chat completions protocol
//! (`POST {base}/chat/completions`, bearer auth). Used for the fast,
//! quality and vision completion families.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{send_json, HttpTransport};
use super::profile::BackendProfile;
use super::traits::{
    estimate_tokens, AttemptError, Backend, Completion, GenerationRequest, OutputConstraint,
};
use crate::error::GatewayError;

const MIN_TEMPERATURE: f32 = 0.0;
const MAX_TEMPERATURE: f32 = 2.0;

/// OpenAI-compatible chat completions client
#[derive(Debug)]
pub struct OpenAiCompatBackend {
    profile: BackendProfile,
    base_url: String,
    api_key: String,
    json_mode: bool,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiCompatBackend {
    /// Create a client
    pub fn new(
        profile: BackendProfile,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(&profile.name, request_timeout)?;
        Ok(Self {
            profile,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            json_mode: false,
            transport,
        })
    }

    /// Declare native JSON output support
    #[must_use]
    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body<'a>(&self, model: &'a str, request: &GenerationRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(instruction) = request.system_instruction() {
            messages.push(ChatMessage {
                role: "system",
                content: instruction.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.user_content(),
        });

        let response_format = (self.json_mode
            && request.constraint() == OutputConstraint::JsonOnly)
            .then_some(ResponseFormat {
                kind: "json_object",
            });

        ChatRequest {
            model,
            messages,
            max_tokens: request.max_tokens(),
            temperature: request.temperature_in(MIN_TEMPERATURE, MAX_TEMPERATURE),
            response_format,
        }
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    async fn attempt(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<Completion, AttemptError> {
        let client = self.transport.client()?;
        let body = self.build_body(model, request);

        let response: ChatResponse = send_json(
            client
                .post(self.completions_url())
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AttemptError::server("response contained no choices"))?
            .message
            .content
            .ok_or_else(|| AttemptError::server("response message had no content"))?;

        let (input_tokens, output_tokens) = match response.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (
                estimate_tokens(&request.user_content()),
                estimate_tokens(&text),
            ),
        };

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

    fn backend(json_mode: bool) -> OpenAiCompatBackend {
        let profile = BackendProfile::new(
            "groq",
            BackendKind::FastCompletion,
            ModelCatalog::single("llama"),
        );
        OpenAiCompatBackend::new(profile, "http://localhost:1/v1/", "key", Duration::from_secs(1))
            .unwrap()
            .with_json_mode(json_mode)
    }

    #[test]
    fn test_completions_url_trims_slash() {
        assert_eq!(backend(false).completions_url(), "http://localhost:1/v1/chat/completions");
    }

    #[test]
    fn test_body_shape() {
        let request = GenerationRequest::new("list files")
            .with_constraint(OutputConstraint::JsonOnly)
            .with_temperature(5.0)
            .with_max_tokens(64);

        let body = serde_json::to_value(backend(true).build_body("llama", &request)).unwrap();
        assert_eq!(body["model"], "llama");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["temperature"], 2.0);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "list files");
        assert_eq!(body["response_format"]["type"], "json_object");

        let body = serde_json::to_value(backend(false).build_body("llama", &request)).unwrap();
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_unconstrained_request_has_no_system_message() {
        let body = backend(false).build_body("llama", &GenerationRequest::new("hi"));
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].role, "user");
    }
}

//! Anthropic Backend
//!
//! Client for the Anthropic messages API (`POST {base}/v1/messages`).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http::{send_json, HttpTransport};
use super::profile::BackendProfile;
use super::traits::{estimate_tokens, AttemptError, Backend, Completion, GenerationRequest};
use crate::error::GatewayError;

/// API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const MIN_TEMPERATURE: f32 = 0.0;
const MAX_TEMPERATURE: f32 = 1.0;

/// Anthropic messages client
#[derive(Debug)]
pub struct AnthropicBackend {
    profile: BackendProfile,
    base_url: String,
    api_key: String,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'static str>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicBackend {
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
            transport,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn build_body<'a>(model: &'a str, request: &GenerationRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model,
            max_tokens: request.max_tokens(),
            temperature: request.temperature_in(MIN_TEMPERATURE, MAX_TEMPERATURE),
            system: request.system_instruction(),
            messages: vec![Message {
                role: "user",
                content: request.user_content(),
            }],
        }
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
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

        let response: MessagesResponse = send_json(
            client
                .post(self.messages_url())
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
        )
        .await?;

        let mut text_blocks = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .peekable();
        if text_blocks.peek().is_none() {
            return Err(AttemptError::server("response contained no text blocks"));
        }
        let text: String = text_blocks.map(|block| block.text.as_str()).collect();

        let (input_tokens, output_tokens) = match response.usage {
            Some(usage) => (usage.input_tokens, usage.output_tokens),
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

//! HTTP Transport
//!
//! Shared plumbing for the provider clients: a closable `reqwest::Client`
//! slot and the mapping from HTTP/transport failures onto [`ErrorKind`].

use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use super::traits::AttemptError;
use crate::error::{ErrorKind, GatewayError};

/// Connect timeout for every provider client
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body excerpt carried into messages
const BODY_EXCERPT_CHARS: usize = 200;

/// A `reqwest::Client` that can be closed
///
/// `reqwest::Client` is reference-counted internally, so attempts clone it out
/// of the slot and the lock is never held across an await.
#[derive(Debug)]
pub struct HttpTransport {
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    /// Build a client with the connect timeout and a per-request timeout
    pub fn new(backend: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|source| GatewayError::HttpClient {
                backend: backend.to_string(),
                source,
            })?;

        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    /// The live client, or a transport error once closed
    pub fn client(&self) -> Result<reqwest::Client, AttemptError> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| AttemptError::transport("backend is closed"))
    }

    /// Drop the client. Idempotent.
    pub fn close(&self) {
        self.client.write().take();
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }
}

/// Send a request and decode a JSON success body
///
/// Non-2xx statuses are classified with [`classify_status`]; bodies that do
/// not decode are server errors.
pub async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, AttemptError> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| classify_transport(&e))?;

    if !status.is_success() {
        return Err(classify_status(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        AttemptError::server(format!("malformed response body: {e}")).with_status(status.as_u16())
    })
}

/// Classify a non-success HTTP status
#[must_use]
pub fn classify_status(status: u16, body: &str) -> AttemptError {
    let kind = match status {
        404 => ErrorKind::ModelNotFound,
        400 if names_missing_model(body) => ErrorKind::ModelNotFound,
        429 => ErrorKind::RateLimited,
        408 => ErrorKind::TransportError,
        500..=599 => ErrorKind::BackendServerError,
        400..=499 => ErrorKind::ClientError,
        _ => ErrorKind::BackendServerError,
    };
    AttemptError::new(kind, excerpt(body)).with_status(status)
}

/// Classify a `reqwest` failure that produced no usable status
#[must_use]
pub fn classify_transport(error: &reqwest::Error) -> AttemptError {
    let detail = if error.is_timeout() {
        "request timed out"
    } else if error.is_connect() {
        "connection failed"
    } else if error.is_body() || error.is_decode() {
        "response body transfer failed"
    } else {
        "request failed"
    };
    AttemptError::transport(format!("{detail}: {error}"))
}

fn names_missing_model(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("model_not_found") || lower.contains("does not exist")
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    let mut excerpt: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
    if trimmed.chars().count() > BODY_EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    excerpt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(404, "").kind, ErrorKind::ModelNotFound);
        assert_eq!(classify_status(429, "slow down").kind, ErrorKind::RateLimited);
        assert_eq!(classify_status(408, "").kind, ErrorKind::TransportError);
        assert_eq!(classify_status(500, "").kind, ErrorKind::BackendServerError);
        assert_eq!(classify_status(503, "").kind, ErrorKind::BackendServerError);
        assert_eq!(classify_status(401, "bad key").kind, ErrorKind::ClientError);
        assert_eq!(classify_status(400, "bad json").kind, ErrorKind::ClientError);
    }

    #[test]
    fn test_400_naming_missing_model_is_model_not_found() {
        let body = r#"{"error":{"code":"model_not_found","message":"The model `x` does not exist"}}"#;
        let err = classify_status(400, body);
        assert_eq!(err.kind, ErrorKind::ModelNotFound);
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(1_000);
        let err = classify_status(500, &body);
        assert_eq!(err.message.len(), BODY_EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_closed_transport_fails_as_transport_error() {
        let transport = HttpTransport::new("t", Duration::from_secs(1)).unwrap();
        assert!(transport.client().is_ok());

        transport.close();
        transport.close();

        assert!(transport.is_closed());
        assert_eq!(
            transport.client().unwrap_err().kind,
            ErrorKind::TransportError
        );
    }
}

//! Error Types
//!
//! Two families of errors live here:
//!
//! - [`ErrorKind`] / [`GenerationError`]: classified per-request failures.
//!   These are carried *inside* a [`GenerationResult`](crate::GenerationResult)
//!   and never returned as `Err`; callers inspect `success` and `error`.
//! - [`GatewayError`] / [`ConfigError`]: construction-time failures that
//!   should abort startup (bad config, zero usable backends).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Per-request failure taxonomy
// ============================================================================

/// Classified failure kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The requested model does not exist on the backend (HTTP 404)
    ModelNotFound,
    /// The backend rejected the call for quota/rate reasons (HTTP 429)
    RateLimited,
    /// The backend failed on its side (HTTP 5xx, malformed body)
    BackendServerError,
    /// Connection, timeout, or body transfer failure
    TransportError,
    /// Any other non-retryable client error (HTTP 4xx)
    ClientError,
    /// Every model in a cascade was tried without success
    AllModelsExhausted,
    /// No backend could service the request
    NoBackendsAvailable,
    /// A fallback hop was warranted but no target was usable
    NoFallbackAvailable,
}

impl ErrorKind {
    /// Whether a single-attempt failure of this kind may be retried on the same model
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::BackendServerError | Self::TransportError
        )
    }

    /// Stable snake_case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModelNotFound => "model_not_found",
            Self::RateLimited => "rate_limited",
            Self::BackendServerError => "backend_server_error",
            Self::TransportError => "transport_error",
            Self::ClientError => "client_error",
            Self::AllModelsExhausted => "all_models_exhausted",
            Self::NoBackendsAvailable => "no_backends_available",
            Self::NoFallbackAvailable => "no_fallback_available",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure attached to a failed `GenerationResult`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
    /// For aggregate failures: the kind of the last underlying attempt failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<ErrorKind>,
}

impl GenerationError {
    /// Create an error with no underlying cause
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            last_failure: None,
        }
    }

    /// Attach the kind of the last underlying attempt failure
    #[must_use]
    pub fn with_last_failure(mut self, kind: ErrorKind) -> Self {
        self.last_failure = Some(kind);
        self
    }

    /// Whether this failure is rate-limit class: either a direct rate-limit
    /// or an exhaustion whose last observed failure was a rate-limit
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.kind == ErrorKind::RateLimited || self.last_failure == Some(ErrorKind::RateLimited)
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GenerationError {}

// ============================================================================
// Construction-time errors
// ============================================================================

/// Errors raised while building the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Zero backends could be configured from the available credentials
    #[error("no backends available: {0}")]
    NoBackendsAvailable(String),

    /// Configuration was unreadable or invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client for a backend could not be created
    #[error("failed to build HTTP client for backend {backend}: {source}")]
    HttpClient {
        /// Backend name
        backend: String,
        /// Underlying reqwest error
        #[source]
        source: reqwest::Error,
    },

    /// A component referenced a backend that is not configured
    #[error("backend not configured: {0}")]
    UnknownBackend(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file was not valid TOML for the schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered back to TOML
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An environment override had an unparseable value
    #[error("invalid value for {var}: {value}")]
    InvalidEnv {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },

    /// Semantic validation failed
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

//! Gateway Configuration
//!
//! TOML configuration with full defaults, environment overrides and
//! validation.
//!
//! # Resolution order
//!
//! 1. Built-in defaults ([`GatewayConfig::default`])
//! 2. Config file (`--config`, else `<config_dir>/gateway/gateway.toml` if present)
//! 3. Environment overrides ([`GatewayConfig::apply_env`])
//!
//! Credentials never live in the file: each backend names the environment
//! variable holding its key (`api_key_env`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::routing::config::{
    BackendConfig, BackendKind, BackoffPolicy, ExecutionMode, ModelCatalog, Pricing, Protocol,
    RetryConfig, RoutingTable,
};

/// Environment variable selecting the execution mode
pub const ENV_MODE: &str = "GATEWAY_MODE";
/// Environment variable overriding the per-request timeout
pub const ENV_REQUEST_TIMEOUT_MS: &str = "GATEWAY_REQUEST_TIMEOUT_MS";
/// Environment variable overriding the retry budget
pub const ENV_MAX_RETRIES: &str = "GATEWAY_MAX_RETRIES";
/// Environment variable overriding the cooldown TTL
pub const ENV_COOLDOWN_TTL_SECS: &str = "GATEWAY_COOLDOWN_TTL_SECS";
/// Environment variable enabling local inference backends
pub const ENV_ENABLE_LOCAL: &str = "GATEWAY_ENABLE_LOCAL";
/// Environment variable pointing local backends at another host
pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";

/// Speculative decoder settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculativeConfig {
    /// Backend that drafts
    pub draft_backend: String,
    /// Backend that verifies
    pub verify_backend: String,
    /// Upper bound on draft length
    pub draft_max_tokens: u32,
    /// Leading tokens compared when scoring
    pub compare_window: usize,
    /// How long the parallel variant waits for a draft
    pub draft_timeout_ms: u64,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            draft_backend: "groq".to_string(),
            verify_backend: "deepseek".to_string(),
            draft_max_tokens: 512,
            compare_window: 50,
            draft_timeout_ms: 10_000,
        }
    }
}

impl SpeculativeConfig {
    /// Draft wait bound
    #[must_use]
    pub fn draft_timeout(&self) -> Duration {
        Duration::from_millis(self.draft_timeout_ms)
    }
}

/// Semantic cache settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether the router consults the cache
    pub enabled: bool,
    /// Minimum similarity for a hit to be served
    pub min_similarity: f32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_similarity: 0.9,
        }
    }
}

/// Top-level gateway configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Default execution mode
    pub mode: ExecutionMode,
    /// Per-call HTTP timeout
    pub request_timeout_ms: u64,
    /// How long a rate-limited backend is skipped
    pub cooldown_ttl_secs: u64,
    /// Default retry policy (backends may override)
    pub retry: RetryConfig,
    /// Routing roles and fallback targets
    pub routing: RoutingTable,
    /// Speculative decoder
    pub speculative: SpeculativeConfig,
    /// Semantic cache
    pub cache: CacheSettings,
    /// Configured backends
    pub backends: Vec<BackendConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Build,
            request_timeout_ms: 120_000,
            cooldown_ttl_secs: 30,
            retry: RetryConfig::default(),
            routing: RoutingTable::default(),
            speculative: SpeculativeConfig::default(),
            cache: CacheSettings::default(),
            backends: default_backends(),
        }
    }
}

fn hosted(
    name: &str,
    kind: BackendKind,
    protocol: Protocol,
    base_url: &str,
    api_key_env: &str,
    models: ModelCatalog,
    pricing: Pricing,
) -> BackendConfig {
    BackendConfig {
        base_url: Some(base_url.to_string()),
        api_key_env: Some(api_key_env.to_string()),
        pricing,
        ..BackendConfig::new(name, kind, protocol, models)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_backends() -> Vec<BackendConfig> {
    let mut groq = hosted(
        "groq",
        BackendKind::FastCompletion,
        Protocol::OpenAi,
        "https://api.groq.com/openai/v1",
        "GROQ_API_KEY",
        ModelCatalog {
            primary: "llama-3.3-70b-versatile".to_string(),
            speed_first: strings(&["llama-3.1-8b-instant", "llama-3.3-70b-versatile"]),
            capability_first: strings(&["llama-3.3-70b-versatile", "llama-3.1-8b-instant"]),
        },
        Pricing::new(0.000_59, 0.000_79),
    );
    groq.json_mode = true;

    let mut deepseek = hosted(
        "deepseek",
        BackendKind::QualityCompletion,
        Protocol::OpenAi,
        "https://api.deepseek.com/v1",
        "DEEPSEEK_API_KEY",
        ModelCatalog {
            primary: "deepseek-chat".to_string(),
            speed_first: strings(&["deepseek-chat"]),
            capability_first: strings(&["deepseek-reasoner", "deepseek-chat"]),
        },
        Pricing::new(0.000_14, 0.000_28),
    );
    deepseek.json_mode = true;

    let claude = hosted(
        "claude",
        BackendKind::QualityCompletion,
        Protocol::Anthropic,
        "https://api.anthropic.com",
        "ANTHROPIC_API_KEY",
        ModelCatalog {
            primary: "claude-sonnet-4-20250514".to_string(),
            speed_first: strings(&["claude-3-5-haiku-20241022"]),
            capability_first: strings(&["claude-sonnet-4-20250514"]),
        },
        Pricing::new(0.003, 0.015),
    );

    let mut openai = hosted(
        "openai",
        BackendKind::VisionCompletion,
        Protocol::OpenAi,
        "https://api.openai.com/v1",
        "OPENAI_API_KEY",
        ModelCatalog {
            primary: "gpt-4o".to_string(),
            speed_first: strings(&["gpt-4o-mini"]),
            capability_first: strings(&["gpt-4o", "gpt-4o-mini"]),
        },
        Pricing::new(0.002_5, 0.01),
    );
    openai.json_mode = true;

    let mut ollama = BackendConfig::new(
        "ollama",
        BackendKind::LocalInference,
        Protocol::Ollama,
        ModelCatalog::single("qwen2.5-coder:7b"),
    );
    ollama.base_url = Some("http://localhost:11434".to_string());
    ollama.enabled = false;

    vec![groq, deepseek, claude, openai, ollama]
}

impl GatewayConfig {
    /// `<config_dir>/gateway/gateway.toml`, if a config dir exists
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gateway").join("gateway.toml"))
    }

    /// Parse from TOML text; omitted fields take defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load an explicit path, else the default path if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Per-call HTTP timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Cooldown period
    #[must_use]
    pub fn cooldown_ttl(&self) -> Duration {
        Duration::from_secs(self.cooldown_ttl_secs)
    }

    /// Backend config by name
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(value) = get(ENV_MODE) {
            self.mode = value.parse().map_err(|_| invalid_env(ENV_MODE, &value))?;
        }
        if let Some(value) = get(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = parse_env(ENV_REQUEST_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = get(ENV_MAX_RETRIES) {
            self.retry.max_retries = parse_env(ENV_MAX_RETRIES, &value)?;
        }
        if let Some(value) = get(ENV_COOLDOWN_TTL_SECS) {
            self.cooldown_ttl_secs = parse_env(ENV_COOLDOWN_TTL_SECS, &value)?;
        }
        if let Some(value) = get(ENV_ENABLE_LOCAL) {
            let enabled = parse_bool(&value).ok_or_else(|| invalid_env(ENV_ENABLE_LOCAL, &value))?;
            for backend in self.local_backends_mut() {
                backend.enabled = enabled;
            }
        }
        if let Some(value) = get(ENV_OLLAMA_HOST) {
            let url = if value.contains("://") {
                value
            } else {
                format!("http://{value}")
            };
            for backend in self.local_backends_mut() {
                backend.base_url = Some(url.clone());
            }
        }
        Ok(())
    }

    fn local_backends_mut(&mut self) -> impl Iterator<Item = &mut BackendConfig> {
        self.backends
            .iter_mut()
            .filter(|b| b.kind == BackendKind::LocalInference)
    }

    /// Semantic validation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be positive".into()));
        }
        validate_retry("retry", &self.retry)?;

        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(ConfigError::Invalid("backend with empty name".into()));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate backend name: {}",
                    backend.name
                )));
            }
            if backend.models.primary.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "backend {} has no primary model",
                    backend.name
                )));
            }
            let pricing = backend.pricing;
            if !(pricing.input_per_1k >= 0.0 && pricing.output_per_1k >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "backend {} has negative pricing",
                    backend.name
                )));
            }
            if let Some(retry) = &backend.retry {
                validate_retry(&format!("backends.{}.retry", backend.name), retry)?;
            }
        }

        if !(0.0..=1.0).contains(&self.cache.min_similarity) {
            return Err(ConfigError::Invalid(
                "cache.min_similarity must be within 0.0 - 1.0".into(),
            ));
        }
        if self.speculative.draft_max_tokens == 0 || self.speculative.compare_window == 0 {
            return Err(ConfigError::Invalid(
                "speculative draft_max_tokens and compare_window must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn validate_retry(section: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    for (name, policy) in [("rate_limit", &retry.rate_limit), ("server_error", &retry.server_error)] {
        validate_backoff(&format!("{section}.{name}"), policy)?;
    }
    Ok(())
}

fn validate_backoff(section: &str, policy: &BackoffPolicy) -> Result<(), ConfigError> {
    if !(policy.multiplier.is_finite() && policy.multiplier >= 1.0) {
        return Err(ConfigError::Invalid(format!(
            "{section}.multiplier must be at least 1.0"
        )));
    }
    if policy.cap_ms < policy.base_ms {
        return Err(ConfigError::Invalid(format!(
            "{section}.cap_ms is below base_ms"
        )));
    }
    Ok(())
}

fn invalid_env(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid_env(var, value))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

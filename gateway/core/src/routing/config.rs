//! Routing Configuration
//!
//! Configuration types for execution modes, backends, pricing, retry/backoff
//! policy and the routing table.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cascade::ModelCascade;

// ============================================================================
// Execution Mode
// ============================================================================

/// Policy selector controlling backend choice and audit behavior
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Lowest latency backend family
    Fast,
    /// Balanced/capability backend family, small steps to a specialist
    #[default]
    Build,
    /// BUILD routing plus a second-opinion audit for review-type steps
    DoubleCheck,
}

impl ExecutionMode {
    /// Whether cascades in this mode prefer speed over capability
    #[must_use]
    pub fn prefers_speed(self) -> bool {
        matches!(self, Self::Fast)
    }

    /// Stable name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Build => "build",
            Self::DoubleCheck => "double_check",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fast" => Ok(Self::Fast),
            "build" => Ok(Self::Build),
            "double_check" | "doublecheck" => Ok(Self::DoubleCheck),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

// ============================================================================
// Backend Kinds
// ============================================================================

/// Closed set of backend variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Low-latency hosted completion (bursty, cooldown-prone)
    FastCompletion,
    /// Higher-capability hosted completion
    QualityCompletion,
    /// Hosted completion with vision-capable models
    VisionCompletion,
    /// Locally hosted inference server
    LocalInference,
}

impl BackendKind {
    /// Specialties declared when the config does not list any
    #[must_use]
    pub fn default_specialties(self) -> Vec<Specialty> {
        match self {
            Self::FastCompletion => vec![Specialty::Speed, Specialty::Code],
            Self::QualityCompletion => vec![Specialty::Reasoning, Specialty::Code, Specialty::Review],
            Self::VisionCompletion => vec![Specialty::Vision, Specialty::Json],
            Self::LocalInference => vec![Specialty::Local, Specialty::Code],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FastCompletion => "fast_completion",
            Self::QualityCompletion => "quality_completion",
            Self::VisionCompletion => "vision_completion",
            Self::LocalInference => "local_inference",
        };
        f.write_str(name)
    }
}

/// Declared backend specialty (used for future filtering only)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    /// Low latency
    Speed,
    /// Source code generation
    Code,
    /// Multi-step reasoning
    Reasoning,
    /// Reviewing and critiquing output
    Review,
    /// Image understanding
    Vision,
    /// Structured JSON output
    Json,
    /// Runs on local hardware
    Local,
}

/// Wire protocol a backend speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// OpenAI-compatible `/chat/completions`
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic `/v1/messages`
    Anthropic,
    /// Ollama `/api/generate`
    Ollama,
}

impl Protocol {
    /// Whether the protocol requires an API key
    #[must_use]
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Base URL used when the backend config leaves it unset
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Ollama => "http://localhost:11434",
        }
    }
}

// ============================================================================
// Pricing
// ============================================================================

/// Per-backend pricing in USD per 1,000 tokens
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Cost per 1,000 input tokens
    pub input_per_1k: f64,
    /// Cost per 1,000 output tokens
    pub output_per_1k: f64,
}

impl Pricing {
    /// Create a pricing entry
    #[must_use]
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Free pricing (local models)
    #[must_use]
    pub fn free() -> Self {
        Self::default()
    }

    /// Cost in USD for the given token counts, never negative
    #[must_use]
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let cost = f64::from(input_tokens) / 1000.0 * self.input_per_1k
            + f64::from(output_tokens) / 1000.0 * self.output_per_1k;
        cost.max(0.0)
    }
}

// ============================================================================
// Retry / Backoff
// ============================================================================

/// Exponential backoff: `min(base * multiplier^attempt, cap)`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub cap_ms: u64,
}

impl BackoffPolicy {
    /// Create a policy with the conventional doubling multiplier
    #[must_use]
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier: 2.0,
            cap_ms,
        }
    }

    /// Delay after failed attempt N (0-indexed)
    ///
    /// Multipliers below 1.0 are treated as 1.0 so delays never shrink.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap_ms as f64)
        } else {
            self.cap_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Retry budget plus the two backoff policies
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries per model after the initial attempt
    pub max_retries: u32,
    /// Backoff applied to rate-limit failures
    pub rate_limit: BackoffPolicy,
    /// Backoff applied to server-side and transport failures
    pub server_error: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit: BackoffPolicy::new(1_000, 60_000),
            server_error: BackoffPolicy::new(1_000, 10_000),
        }
    }
}

impl RetryConfig {
    /// A config that never waits between attempts (tests, dry runs)
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            rate_limit: BackoffPolicy::new(0, 0),
            server_error: BackoffPolicy::new(0, 0),
        }
    }
}

// ============================================================================
// Models
// ============================================================================

/// The models a backend exposes, with per-mode orderings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    /// Always tried first regardless of mode
    pub primary: String,
    /// Remaining models ordered fastest first
    pub speed_first: Vec<String>,
    /// Remaining models ordered most capable first
    pub capability_first: Vec<String>,
}

impl ModelCatalog {
    /// Catalog with a single model
    pub fn single(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            ..Default::default()
        }
    }

    /// Cascade for an execution mode
    #[must_use]
    pub fn cascade_for(&self, mode: ExecutionMode) -> ModelCascade {
        let ordering = if mode.prefers_speed() {
            &self.speed_first
        } else {
            &self.capability_first
        };
        ModelCascade::new(&self.primary, ordering)
    }
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Configuration for one backend/credential pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name
    pub name: String,

    /// Backend variant
    pub kind: BackendKind,

    /// Wire protocol
    pub protocol: Protocol,

    /// Endpoint base URL (protocol default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Whether the backend may be used at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether the provider supports a native JSON output mode
    #[serde(default)]
    pub json_mode: bool,

    /// Models and per-mode orderings
    pub models: ModelCatalog,

    /// Token pricing
    #[serde(default)]
    pub pricing: Pricing,

    /// Declared specialties (kind defaults when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specialties: Vec<Specialty>,

    /// Per-backend retry override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

fn default_true() -> bool {
    true
}

impl BackendConfig {
    /// Create a config with protocol defaults
    pub fn new(
        name: impl Into<String>,
        kind: BackendKind,
        protocol: Protocol,
        models: ModelCatalog,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            protocol,
            base_url: None,
            api_key_env: None,
            enabled: true,
            json_mode: false,
            models,
            pricing: Pricing::default(),
            specialties: Vec::new(),
            retry: None,
        }
    }

    /// Effective base URL without trailing slash
    #[must_use]
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Effective specialties
    #[must_use]
    pub fn effective_specialties(&self) -> Vec<Specialty> {
        if self.specialties.is_empty() {
            self.kind.default_specialties()
        } else {
            self.specialties.clone()
        }
    }

    /// Read the API key from the environment; `None` when unset or blank
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref()?;
        std::env::var(var)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

// ============================================================================
// Routing Table
// ============================================================================

/// Per-mode cross-backend fallback targets (single hop, first usable wins)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackTable {
    /// Targets for FAST mode
    pub fast: Vec<String>,
    /// Targets for BUILD mode
    pub build: Vec<String>,
    /// Targets for DOUBLE-CHECK mode
    pub double_check: Vec<String>,
}

impl FallbackTable {
    /// Targets for a mode, in priority order
    #[must_use]
    pub fn targets(&self, mode: ExecutionMode) -> &[String] {
        match mode {
            ExecutionMode::Fast => &self.fast,
            ExecutionMode::Build => &self.build,
            ExecutionMode::DoubleCheck => &self.double_check,
        }
    }
}

/// Named backend roles the routing policy chooses between
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingTable {
    /// Lowest-latency family (FAST mode)
    pub fast: String,
    /// Balanced/capability family (BUILD, DOUBLE-CHECK)
    pub balanced: String,
    /// Lightweight specialist for small steps
    pub specialist: Option<String>,
    /// Fixed audit backend for DOUBLE-CHECK
    pub audit: Option<String>,
    /// Substitution order when a preferred backend is unavailable
    pub priority: Vec<String>,
    /// Steps below this token estimate count as small
    pub small_step_max_tokens: u32,
    /// Steps below this complexity count as small
    pub small_step_max_complexity: f32,
    /// Cross-backend fallback targets per mode
    pub fallbacks: FallbackTable,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            fast: "groq".to_string(),
            balanced: "deepseek".to_string(),
            specialist: Some("ollama".to_string()),
            audit: Some("claude".to_string()),
            priority: vec![
                "groq".to_string(),
                "deepseek".to_string(),
                "claude".to_string(),
                "openai".to_string(),
                "ollama".to_string(),
            ],
            small_step_max_tokens: 800,
            small_step_max_complexity: 0.3,
            fallbacks: FallbackTable {
                fast: vec!["deepseek".to_string(), "claude".to_string()],
                build: Vec::new(),
                double_check: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = BackoffPolicy::new(100, 1_000);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1_000)); // Capped
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let policy = BackoffPolicy {
            base_ms: 250,
            multiplier: 1.7,
            cap_ms: 9_000,
        };
        let delays: Vec<Duration> = (0..20).map(|a| policy.delay_for_attempt(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(9_000)));
    }

    #[test]
    fn test_sub_unit_multiplier_never_shrinks_delays() {
        let policy = BackoffPolicy {
            base_ms: 1_000,
            multiplier: 0.5,
            cap_ms: 60_000,
        };
        let delays: Vec<Duration> = (0..4).map(|a| policy.delay_for_attempt(a)).collect();
        assert_eq!(delays, vec![Duration::from_millis(1_000); 4]);
    }

    #[test]
    fn test_rate_limit_cap_exceeds_server_cap_by_default() {
        let retry = RetryConfig::default();
        assert!(retry.rate_limit.cap_ms > retry.server_error.cap_ms);
    }

    #[test]
    fn test_pricing_scenario() {
        let pricing = Pricing::new(0.14, 0.28);
        let cost = pricing.cost(1_000, 500);
        assert!((cost - 0.28).abs() < 1e-9);
        assert!(Pricing::free().cost(10_000, 10_000).abs() < f64::EPSILON);
    }

    #[test]
    fn test_catalog_cascade_per_mode() {
        let catalog = ModelCatalog {
            primary: "main".to_string(),
            speed_first: vec!["tiny".to_string(), "main".to_string()],
            capability_first: vec!["large".to_string(), "tiny".to_string()],
        };

        assert_eq!(
            catalog.cascade_for(ExecutionMode::Fast).models(),
            ["main", "tiny"]
        );
        assert_eq!(
            catalog.cascade_for(ExecutionMode::Build).models(),
            ["main", "large", "tiny"]
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("DOUBLE-CHECK".parse::<ExecutionMode>(), Ok(ExecutionMode::DoubleCheck));
        assert_eq!("fast".parse::<ExecutionMode>(), Ok(ExecutionMode::Fast));
        assert!("turbo".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_backend_config_base_url() {
        let mut config = BackendConfig::new(
            "local",
            BackendKind::LocalInference,
            Protocol::Ollama,
            ModelCatalog::single("qwen"),
        );
        assert_eq!(config.effective_base_url(), "http://localhost:11434");

        config.base_url = Some("http://gpu-box:11434/".to_string());
        assert_eq!(config.effective_base_url(), "http://gpu-box:11434");
        assert_eq!(
            config.effective_specialties(),
            vec![Specialty::Local, Specialty::Code]
        );
    }
}

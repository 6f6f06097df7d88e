//! Step Metadata
//!
//! The unit of work the upstream planner attaches to each generation request.
//! The gateway only reads steps; it never mutates them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Context key carrying an explicit backend override
pub const BACKEND_OVERRIDE_KEY: &str = "backend";

/// Context key carrying file-list hints
pub const FILES_HINT_KEY: &str = "files";

/// Kind of work a step performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Writing new code
    #[default]
    CodeGeneration,
    /// Restructuring existing code
    Refactoring,
    /// Reading and reasoning about code or data
    Analysis,
    /// Checking output against criteria
    Validation,
    /// Reviewing another step's output
    Review,
    /// Producing a targeted patch
    Patch,
}

impl StepType {
    /// Step types that receive a second-opinion audit in DOUBLE-CHECK mode
    #[must_use]
    pub fn is_auditable(self) -> bool {
        matches!(self, Self::Analysis | Self::Validation | Self::Review)
    }

    /// Stable snake_case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::Refactoring => "refactoring",
            Self::Analysis => "analysis",
            Self::Validation => "validation",
            Self::Review => "review",
            Self::Patch => "patch",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "code_generation" | "code" => Ok(Self::CodeGeneration),
            "refactoring" | "refactor" => Ok(Self::Refactoring),
            "analysis" => Ok(Self::Analysis),
            "validation" => Ok(Self::Validation),
            "review" => Ok(Self::Review),
            "patch" => Ok(Self::Patch),
            other => Err(format!("unknown step type: {other}")),
        }
    }
}

/// A step issued by the upstream executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier
    pub id: String,

    /// Free-text description of the work
    #[serde(default)]
    pub description: String,

    /// Kind of work
    #[serde(rename = "type", default)]
    pub step_type: StepType,

    /// Complexity estimate (0.0 - 1.0)
    #[serde(default)]
    pub complexity: f32,

    /// Estimated token cost of the step
    #[serde(default)]
    pub estimated_tokens: u32,

    /// Ids of steps this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Criteria the output must satisfy
    #[serde(default)]
    pub validation_criteria: Vec<String>,

    /// Free-form context (backend override, file hints, ...)
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl Step {
    /// Create a step with defaults for everything but id and type
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            step_type,
            complexity: 0.5,
            estimated_tokens: 0,
            dependencies: Vec::new(),
            validation_criteria: Vec::new(),
            context: HashMap::new(),
        }
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set complexity (clamped to 0.0 - 1.0)
    #[must_use]
    pub fn with_complexity(mut self, complexity: f32) -> Self {
        self.complexity = complexity.clamp(0.0, 1.0);
        self
    }

    /// Set estimated tokens
    #[must_use]
    pub fn with_estimated_tokens(mut self, tokens: u32) -> Self {
        self.estimated_tokens = tokens;
        self
    }

    /// Add a validation criterion
    #[must_use]
    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.validation_criteria.push(criterion.into());
        self
    }

    /// Request a specific backend for this step
    #[must_use]
    pub fn with_backend_override(mut self, backend: impl Into<String>) -> Self {
        self.context.insert(
            BACKEND_OVERRIDE_KEY.to_string(),
            serde_json::Value::String(backend.into()),
        );
        self
    }

    /// Explicit backend override, if one was supplied and non-empty
    #[must_use]
    pub fn backend_override(&self) -> Option<&str> {
        self.context
            .get(BACKEND_OVERRIDE_KEY)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// File-list hints from the context map
    #[must_use]
    pub fn file_hints(&self) -> Vec<&str> {
        self.context
            .get(FILES_HINT_KEY)
            .and_then(serde_json::Value::as_array)
            .map(|files| files.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Complexity clamped into range, for steps deserialized from outside
    #[must_use]
    pub fn effective_complexity(&self) -> f32 {
        if self.complexity.is_nan() {
            0.0
        } else {
            self.complexity.clamp(0.0, 1.0)
        }
    }
}

//! Routing Policy
//!
//! Pure backend selection: `(mode, step, availability) -> RoutingDecision`.
//! Holds no state and performs no I/O, so the same inputs always produce the
//! same decision.
//!
//! # Routing Decision Flow
//!
//! ```text
//! 1. Explicit step override (context key "backend") if configured
//! 2. Preferred backend for the mode
//!      FAST         -> fast family
//!      BUILD        -> specialist for small steps (if available), else balanced
//!      DOUBLE-CHECK -> as BUILD
//! 3. Preferred cooling down  -> next available backend in priority order
//!    Preferred unconfigured  -> any available backend (warning)
//! 4. DOUBLE-CHECK + analysis/validation/review step -> attach audit backend
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use super::config::{ExecutionMode, RoutingTable};
use crate::step::Step;

// ============================================================================
// Availability
// ============================================================================

/// Snapshot of configured backends and whether each is currently usable
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Availability {
    backends: BTreeMap<String, bool>,
}

impl Availability {
    /// Empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a configured backend
    pub fn insert(&mut self, name: impl Into<String>, available: bool) {
        self.backends.insert(name.into(), available);
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, available: bool) -> Self {
        self.insert(name, available);
        self
    }

    /// Whether the backend is configured at all
    #[must_use]
    pub fn is_configured(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Whether the backend is configured and not cooling down
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.backends.get(name).copied().unwrap_or(false)
    }

    /// Configured names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Whether nothing is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for Availability {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self {
            backends: iter.into_iter().map(|(n, a)| (n.into(), a)).collect(),
        }
    }
}

// ============================================================================
// Routing Decision
// ============================================================================

/// Why a primary backend was chosen
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RoutingReason {
    /// The step named this backend explicitly
    Override,
    /// The mode's preferred backend was available
    Preferred,
    /// Small step routed to the lightweight specialist
    SmallStepSpecialist,
    /// Preferred backend was cooling down; a substitute was taken
    CooledDown {
        /// Backend that was skipped
        preferred: String,
    },
    /// Every candidate was cooling down; the preferred backend is used anyway
    AllCoolingDown,
    /// Preferred backend is not configured
    Substituted {
        /// Backend that was wanted
        preferred: String,
    },
}

/// Result of backend selection
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Backend that runs the request
    pub primary: String,
    /// Backend that audits the result (DOUBLE-CHECK only)
    pub audit: Option<String>,
    /// Why `primary` was chosen
    pub reason: RoutingReason,
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.primary, self.reason)?;
        if let Some(audit) = &self.audit {
            write!(f, " audited by {audit}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Routing Policy
// ============================================================================

/// Mode-based backend selection over a [`RoutingTable`]
#[derive(Clone, Debug, Default)]
pub struct RoutingPolicy {
    table: RoutingTable,
}

impl RoutingPolicy {
    /// Create a policy over a routing table
    #[must_use]
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    /// The routing table
    #[must_use]
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Whether a step counts as small (both estimates below thresholds)
    #[must_use]
    pub fn is_small_step(&self, step: &Step) -> bool {
        step.estimated_tokens < self.table.small_step_max_tokens
            && step.effective_complexity() < self.table.small_step_max_complexity
    }

    /// Select the primary (and optional audit) backend
    ///
    /// Returns `None` only when no backend is configured.
    #[must_use]
    pub fn select(
        &self,
        mode: ExecutionMode,
        step: &Step,
        availability: &Availability,
    ) -> Option<RoutingDecision> {
        if availability.is_empty() {
            return None;
        }

        if let Some(name) = step.backend_override() {
            if availability.is_configured(name) {
                return Some(RoutingDecision {
                    primary: name.to_string(),
                    audit: None,
                    reason: RoutingReason::Override,
                });
            }
            warn!(step = %step.id, backend = name, "override names an unconfigured backend, ignoring");
        }

        let (preferred, reason) = self.preferred(mode, step, availability);
        let (primary, reason) = self.resolve(preferred, reason, availability);

        let audit = if mode == ExecutionMode::DoubleCheck && step.step_type.is_auditable() {
            self.table
                .audit
                .as_deref()
                .filter(|name| availability.is_available(name))
                .map(str::to_string)
        } else {
            None
        };

        Some(RoutingDecision {
            primary,
            audit,
            reason,
        })
    }

    fn preferred<'a>(
        &'a self,
        mode: ExecutionMode,
        step: &Step,
        availability: &Availability,
    ) -> (&'a str, RoutingReason) {
        match mode {
            ExecutionMode::Fast => (self.table.fast.as_str(), RoutingReason::Preferred),
            ExecutionMode::Build | ExecutionMode::DoubleCheck => {
                let specialist = self
                    .table
                    .specialist
                    .as_deref()
                    .filter(|name| availability.is_available(name));
                match specialist {
                    Some(name) if self.is_small_step(step) => {
                        (name, RoutingReason::SmallStepSpecialist)
                    }
                    _ => (self.table.balanced.as_str(), RoutingReason::Preferred),
                }
            }
        }
    }

    fn resolve(
        &self,
        preferred: &str,
        reason: RoutingReason,
        availability: &Availability,
    ) -> (String, RoutingReason) {
        if availability.is_available(preferred) {
            return (preferred.to_string(), reason);
        }

        if availability.is_configured(preferred) {
            return match self.first_available(availability, preferred) {
                Some(substitute) => (
                    substitute,
                    RoutingReason::CooledDown {
                        preferred: preferred.to_string(),
                    },
                ),
                None => (preferred.to_string(), RoutingReason::AllCoolingDown),
            };
        }

        warn!(preferred, "preferred backend not configured, substituting");
        let substitute = self
            .first_available(availability, preferred)
            .or_else(|| self.candidates(availability, preferred).next().map(str::to_string))
            .unwrap_or_else(|| preferred.to_string());
        (
            substitute,
            RoutingReason::Substituted {
                preferred: preferred.to_string(),
            },
        )
    }

    /// Priority list first, then remaining configured names in sorted order
    fn candidates<'a>(
        &'a self,
        availability: &'a Availability,
        exclude: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        let prioritized = self
            .table
            .priority
            .iter()
            .map(String::as_str)
            .filter(move |name| availability.is_configured(name));
        let rest = availability
            .names()
            .filter(move |name| !self.table.priority.iter().any(|p| p == name));
        prioritized.chain(rest).filter(move |name| *name != exclude)
    }

    fn first_available(&self, availability: &Availability, exclude: &str) -> Option<String> {
        self.candidates(availability, exclude)
            .find(|name| availability.is_available(name))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepType;
    use pretty_assertions::assert_eq;

    fn all_available() -> Availability {
        ["groq", "deepseek", "claude", "openai", "ollama"]
            .into_iter()
            .map(|name| (name, true))
            .collect()
    }

    fn normal_step(step_type: StepType) -> Step {
        Step::new("s1", step_type)
            .with_complexity(0.7)
            .with_estimated_tokens(2_000)
    }

    #[test]
    fn test_fast_mode_picks_fast_family() {
        let policy = RoutingPolicy::default();
        let decision = policy
            .select(ExecutionMode::Fast, &normal_step(StepType::Review), &all_available())
            .unwrap();

        assert_eq!(decision.primary, "groq");
        assert_eq!(decision.audit, None);
        assert_eq!(decision.reason, RoutingReason::Preferred);
    }

    #[test]
    fn test_build_mode_small_step_goes_to_specialist() {
        let policy = RoutingPolicy::default();
        let small = Step::new("s", StepType::Patch)
            .with_complexity(0.1)
            .with_estimated_tokens(200);

        let decision = policy.select(ExecutionMode::Build, &small, &all_available()).unwrap();
        assert_eq!(decision.primary, "ollama");
        assert_eq!(decision.reason, RoutingReason::SmallStepSpecialist);

        // Specialist unavailable -> balanced
        let availability = all_available().with("ollama", false);
        let decision = policy.select(ExecutionMode::Build, &small, &availability).unwrap();
        assert_eq!(decision.primary, "deepseek");

        // Only one threshold met -> not small
        let half = Step::new("s", StepType::Patch)
            .with_complexity(0.1)
            .with_estimated_tokens(5_000);
        let decision = policy.select(ExecutionMode::Build, &half, &all_available()).unwrap();
        assert_eq!(decision.primary, "deepseek");
    }

    #[test]
    fn test_double_check_audits_review_types_only() {
        let policy = RoutingPolicy::default();

        for step_type in [StepType::Analysis, StepType::Validation, StepType::Review] {
            let decision = policy
                .select(ExecutionMode::DoubleCheck, &normal_step(step_type), &all_available())
                .unwrap();
            assert_eq!(decision.primary, "deepseek");
            assert_eq!(decision.audit.as_deref(), Some("claude"));
        }

        for step_type in [StepType::CodeGeneration, StepType::Refactoring, StepType::Patch] {
            let decision = policy
                .select(ExecutionMode::DoubleCheck, &normal_step(step_type), &all_available())
                .unwrap();
            assert_eq!(decision.audit, None);
        }

        let decision = policy
            .select(ExecutionMode::Build, &normal_step(StepType::Review), &all_available())
            .unwrap();
        assert_eq!(decision.audit, None);
    }

    #[test]
    fn test_override_bypasses_policy() {
        let policy = RoutingPolicy::default();
        let step = normal_step(StepType::Review).with_backend_override("openai");

        let decision = policy
            .select(ExecutionMode::DoubleCheck, &step, &all_available())
            .unwrap();
        assert_eq!(decision.primary, "openai");
        assert_eq!(decision.reason, RoutingReason::Override);
        assert_eq!(decision.audit, None);

        // Unknown override is ignored
        let step = normal_step(StepType::Patch).with_backend_override("mistral");
        let decision = policy.select(ExecutionMode::Fast, &step, &all_available()).unwrap();
        assert_eq!(decision.primary, "groq");
    }

    #[test]
    fn test_cooling_preferred_is_substituted_in_priority_order() {
        let policy = RoutingPolicy::default();
        let availability = all_available().with("groq", false);

        let decision = policy
            .select(ExecutionMode::Fast, &normal_step(StepType::Patch), &availability)
            .unwrap();
        assert_eq!(decision.primary, "deepseek");
        assert_eq!(
            decision.reason,
            RoutingReason::CooledDown {
                preferred: "groq".to_string()
            }
        );
    }

    #[test]
    fn test_all_cooling_keeps_preferred() {
        let policy = RoutingPolicy::default();
        let availability: Availability = [("groq", false), ("deepseek", false)].into_iter().collect();

        let decision = policy
            .select(ExecutionMode::Fast, &normal_step(StepType::Patch), &availability)
            .unwrap();
        assert_eq!(decision.primary, "groq");
        assert_eq!(decision.reason, RoutingReason::AllCoolingDown);
    }

    #[test]
    fn test_unconfigured_preferred_falls_back_to_any_available() {
        let policy = RoutingPolicy::default();
        let availability: Availability = [("zeta", true), ("alpha", true)].into_iter().collect();

        let decision = policy
            .select(ExecutionMode::Build, &normal_step(StepType::Patch), &availability)
            .unwrap();
        // Not in the priority list -> sorted order
        assert_eq!(decision.primary, "alpha");
        assert_eq!(
            decision.reason,
            RoutingReason::Substituted {
                preferred: "deepseek".to_string()
            }
        );
    }

    #[test]
    fn test_no_backends_yields_none() {
        let policy = RoutingPolicy::default();
        assert!(policy
            .select(ExecutionMode::Fast, &normal_step(StepType::Patch), &Availability::new())
            .is_none());
    }

    #[test]
    fn test_selection_is_deterministic() {
        let policy = RoutingPolicy::default();
        let availability = all_available().with("deepseek", false);
        let step = normal_step(StepType::Validation);

        let first = policy.select(ExecutionMode::DoubleCheck, &step, &availability);
        for _ in 0..50 {
            assert_eq!(policy.select(ExecutionMode::DoubleCheck, &step, &availability), first);
        }
    }
}

//! Cross-Backend Fallback
//!
//! Decides where a request goes after its primary backend exhausted on rate
//! limits. Fallback is a single hop: the chosen target is never itself
//! fallen back from.

use super::config::{ExecutionMode, FallbackTable};
use super::policy::Availability;

/// Outcome of fallback resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FallbackResolution {
    /// The mode defines no fallback targets; keep the failure
    NotDefined,
    /// Targets exist but none is configured and available
    Unavailable {
        /// Targets that were considered
        candidates: Vec<String>,
    },
    /// Rerun the request on this backend
    Target(String),
}

/// Per-mode fallback planner
#[derive(Clone, Debug, Default)]
pub struct FallbackPlanner {
    table: FallbackTable,
}

impl FallbackPlanner {
    /// Create a planner over a fallback table
    #[must_use]
    pub fn new(table: FallbackTable) -> Self {
        Self { table }
    }

    /// Whether the mode has any fallback targets
    #[must_use]
    pub fn has_targets(&self, mode: ExecutionMode) -> bool {
        !self.table.targets(mode).is_empty()
    }

    /// Pick the first usable target for `mode`, skipping the failed backend
    #[must_use]
    pub fn resolve(
        &self,
        mode: ExecutionMode,
        failed: &str,
        availability: &Availability,
    ) -> FallbackResolution {
        let candidates: Vec<String> = self
            .table
            .targets(mode)
            .iter()
            .filter(|name| name.as_str() != failed)
            .cloned()
            .collect();

        if candidates.is_empty() {
            return if self.has_targets(mode) {
                FallbackResolution::Unavailable { candidates }
            } else {
                FallbackResolution::NotDefined
            };
        }

        match candidates
            .iter()
            .find(|name| availability.is_available(name))
        {
            Some(target) => FallbackResolution::Target(target.clone()),
            None => FallbackResolution::Unavailable { candidates },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> FallbackPlanner {
        FallbackPlanner::new(FallbackTable {
            fast: vec!["deepseek".to_string(), "claude".to_string()],
            build: Vec::new(),
            double_check: Vec::new(),
        })
    }

    #[test]
    fn test_first_available_target_wins() {
        let availability: Availability =
            [("groq", false), ("deepseek", false), ("claude", true)].into_iter().collect();

        assert_eq!(
            planner().resolve(ExecutionMode::Fast, "groq", &availability),
            FallbackResolution::Target("claude".to_string())
        );
    }

    #[test]
    fn test_mode_without_targets() {
        let availability: Availability = [("deepseek", true)].into_iter().collect();
        assert_eq!(
            planner().resolve(ExecutionMode::Build, "deepseek", &availability),
            FallbackResolution::NotDefined
        );
    }

    #[test]
    fn test_no_usable_target() {
        // Neither target configured
        let availability: Availability = [("groq", false)].into_iter().collect();
        assert_eq!(
            planner().resolve(ExecutionMode::Fast, "groq", &availability),
            FallbackResolution::Unavailable {
                candidates: vec!["deepseek".to_string(), "claude".to_string()]
            }
        );
    }

    #[test]
    fn test_failed_backend_is_never_its_own_target() {
        let availability: Availability = [("deepseek", true)].into_iter().collect();
        let planner = FallbackPlanner::new(FallbackTable {
            fast: vec!["deepseek".to_string()],
            ..Default::default()
        });

        assert_eq!(
            planner.resolve(ExecutionMode::Fast, "deepseek", &availability),
            FallbackResolution::Unavailable {
                candidates: Vec::new()
            }
        );
    }
}

//! Token-budget tiers derived from a model's context window.

use serde::{Deserialize, Serialize};

use crate::types::{AdaptiveBudgetConfig, MODEL_CONTEXT_WINDOWS};

/// Which budget tier a model falls into, derived from its context window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Cloud,
    MidRange,
    OnDevice,
    Tiny,
}

impl ModelTier {
    /// Classify a raw context-window size in tokens.
    #[must_use]
    pub const fn from_context_window(window: u32) -> Self {
        if window >= 100_000 {
            Self::Cloud
        } else if window >= 32_000 {
            Self::MidRange
        } else if window >= 8_000 {
            Self::OnDevice
        } else {
            Self::Tiny
        }
    }

    /// Classify by model name, looking it up in [`MODEL_CONTEXT_WINDOWS`].
    /// An unrecognized name falls back to [`Self::Tiny`] — the safest
    /// (smallest) budget, since overestimating a model's window risks
    /// building a prompt the model cannot actually hold.
    #[must_use]
    pub fn from_model_name(name: &str) -> Self {
        let window =
            MODEL_CONTEXT_WINDOWS.iter().find(|(known, _)| *known == name).map_or(0, |(_, window)| *window);
        Self::from_context_window(window)
    }

    /// The fixed per-buffer token budgets and max conversation turns for
    /// this tier. Components always sum exactly to `total`.
    #[must_use]
    pub const fn budgets(self) -> AdaptiveBudgetConfig {
        match self {
            Self::Cloud => AdaptiveBudgetConfig {
                immediate: 4000,
                working: 4000,
                episodic: 2500,
                semantic: 1500,
                total: 12_000,
                max_conversation_turns: 20,
            },
            Self::MidRange => AdaptiveBudgetConfig {
                immediate: 3000,
                working: 2500,
                episodic: 1500,
                semantic: 1000,
                total: 8_000,
                max_conversation_turns: 12,
            },
            Self::OnDevice => AdaptiveBudgetConfig {
                immediate: 1500,
                working: 1500,
                episodic: 700,
                semantic: 300,
                total: 4_000,
                max_conversation_turns: 6,
            },
            Self::Tiny => AdaptiveBudgetConfig {
                immediate: 1000,
                working: 600,
                episodic: 300,
                semantic: 100,
                total: 2_000,
                max_conversation_turns: 3,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_window_boundaries_are_inclusive_on_the_lower_edge() {
        assert_eq!(ModelTier::from_context_window(99_999), ModelTier::MidRange);
        assert_eq!(ModelTier::from_context_window(100_000), ModelTier::Cloud);
        assert_eq!(ModelTier::from_context_window(7_999), ModelTier::Tiny);
        assert_eq!(ModelTier::from_context_window(8_000), ModelTier::OnDevice);
    }

    #[test]
    fn budgets_always_sum_to_total() {
        for tier in [ModelTier::Cloud, ModelTier::MidRange, ModelTier::OnDevice, ModelTier::Tiny] {
            let b = tier.budgets();
            assert_eq!(b.immediate + b.working + b.episodic + b.semantic, b.total);
        }
    }

    #[test]
    fn unknown_model_name_falls_back_to_tiny() {
        assert_eq!(ModelTier::from_model_name("some-unlisted-model"), ModelTier::Tiny);
    }

    #[test]
    fn known_model_name_resolves_its_tier() {
        assert_eq!(ModelTier::from_model_name("gpt-4-turbo"), ModelTier::Cloud);
        assert_eq!(ModelTier::from_model_name("gpt-4"), ModelTier::OnDevice);
    }
}

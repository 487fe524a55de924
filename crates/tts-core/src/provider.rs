//! TTS upstream provider identifiers.
//!
//! Modeled as a closed sum type rather than an open string registry: the
//! three providers are known at compile time and each has a fixed default
//! sample rate.

use serde::{Deserialize, Serialize};

use crate::error::{TtsCoreError, TtsCoreResult};

/// A supported upstream TTS provider.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// High-fidelity neural voice with emotion/exaggeration controls.
    Chatterbox,
    /// Cloud multi-voice provider.
    Vibevoice,
    /// Lightweight local/offline provider.
    Piper,
}

impl Provider {
    /// The provider's identifier as used in cache keys, config, and the
    /// upstream HTTP contract.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Chatterbox => "chatterbox",
            Self::Vibevoice => "vibevoice",
            Self::Piper => "piper",
        }
    }

    /// Default output sample rate in Hz for this provider.
    #[must_use]
    pub const fn default_sample_rate(self) -> u32 {
        match self {
            Self::Piper => 22050,
            Self::Vibevoice | Self::Chatterbox => 24000,
        }
    }

    /// Whether this provider accepts the chatterbox-specific tuning fields
    /// (`exaggeration`, `cfg_weight`, `language`).
    #[must_use]
    pub const fn supports_chatterbox_fields(self) -> bool {
        matches!(self, Self::Chatterbox)
    }

    /// Parse from the provider id string.
    pub fn parse(value: &str) -> TtsCoreResult<Self> {
        match value {
            "chatterbox" => Ok(Self::Chatterbox),
            "vibevoice" => Ok(Self::Vibevoice),
            "piper" => Ok(Self::Piper),
            other => Err(TtsCoreError::unknown_provider(other)),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

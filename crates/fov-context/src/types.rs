//! Value types shared across the context manager, confidence monitor, and
//! session layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tts_core::Provider;
use tts_pool::ChatterboxConfig;

/// Who spoke a turn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of a conversation, with a rough token estimate and whether it
/// interrupted audio playback.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_estimate: usize,
    pub is_barge_in: bool,
}

impl ConversationTurn {
    #[must_use]
    pub fn new(role: TurnRole, content: impl Into<String>, timestamp: DateTime<Utc>, is_barge_in: bool) -> Self {
        let content = content.into();
        let token_estimate = estimate_tokens(&content);
        Self { role, content, timestamp, token_estimate, is_barge_in }
    }
}

/// Rough token estimate for a string: four characters per token, the same
/// heuristic the buffer-truncation policy uses.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// A segment of transcript attached to the currently playing topic (e.g.
/// the sentence the learner interrupted mid-playback).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    pub position_ms: i64,
}

/// A single glossary entry surfaced in the working buffer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlossaryTerm {
    pub term: String,
    pub definition: String,
}

/// A common misconception worth flagging while a topic is active.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MisconceptionTrigger {
    pub trigger_phrase: String,
    pub correction: String,
}

/// A completed topic's summary, retained in the episodic buffer with a
/// mastery estimate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TopicSummary {
    pub topic_id: String,
    pub title: String,
    pub summary: String,
    pub mastery: f64,
}

/// Where the learner currently sits in the curriculum outline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CurriculumPosition {
    pub curriculum_id: String,
    pub title: String,
    pub current_topic_index: usize,
    pub total_topics: usize,
    pub unit_title: Option<String>,
    pub module_title: Option<String>,
}

/// A learner's stated or inferred pacing preference.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PacePreference {
    Slower,
    #[default]
    Normal,
    Faster,
}

/// Rolling counters describing how a learner has been engaging this
/// session, surfaced in the episodic buffer when non-zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LearnerSignals {
    pub clarification_requests: u32,
    pub repetition_requests: u32,
    pub confusion_indicators: u32,
    pub pace_preference: PacePreference,
    pub topics_mastered: u32,
    pub struggling_concepts: Vec<String>,
}

/// Per-buffer token budgets, always summing to `total`, derived from a
/// [`crate::model_tier::ModelTier`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdaptiveBudgetConfig {
    pub immediate: usize,
    pub working: usize,
    pub episodic: usize,
    pub semantic: usize,
    pub total: usize,
    pub max_conversation_turns: usize,
}

/// Client-reported playback position for a user's audio session, updated
/// by periodic heartbeats rather than pushed events.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub curriculum_id: Option<String>,
    pub topic_id: Option<String>,
    pub segment_index: i64,
    pub segment_offset_ms: i64,
    pub is_playing: bool,
    pub last_heartbeat: DateTime<Utc>,
}

impl PlaybackState {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            curriculum_id: None,
            topic_id: None,
            segment_index: 0,
            segment_offset_ms: 0,
            is_playing: false,
            last_heartbeat: now,
        }
    }
}

/// Voice tuning a user has chosen, doubling as the input to the TTS cache
/// key: two users with identical configs share cache entries.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserVoiceConfig {
    pub provider: Provider,
    pub voice_id: String,
    pub speed: f64,
    pub exaggeration: Option<f64>,
    pub cfg_weight: Option<f64>,
    pub language: Option<String>,
}

impl UserVoiceConfig {
    /// Project this config to the chatterbox-specific shape the resource
    /// pool consumes, or `None` for a provider that does not support those
    /// fields.
    #[must_use]
    pub fn get_chatterbox_config(&self) -> Option<ChatterboxConfig> {
        self.provider.supports_chatterbox_fields().then(|| ChatterboxConfig {
            exaggeration: self.exaggeration,
            cfg_weight: self.cfg_weight,
            language: self.language.clone(),
        })
    }
}

/// Configuration used when a [`crate::session::SessionManager`] starts a
/// new conversation session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub model_name: String,
    pub base_system_prompt: String,
    pub auto_expand_context: bool,
}

/// A notable event recorded on a conversation session's audit log (state
/// transitions, expansion recommendations, barge-ins).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
}

impl SessionEvent {
    #[must_use]
    pub fn new(kind: impl Into<String>, timestamp: DateTime<Utc>, detail: Option<String>) -> Self {
        Self { kind: kind.into(), timestamp, detail }
    }
}

/// Well-known model names mapped to their context-window sizes, used by
/// [`crate::model_tier::ModelTier::from_model_name`].
pub const MODEL_CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("claude-3-opus", 200_000),
    ("claude-3-sonnet", 200_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("llama-3-70b", 8_192),
    ("llama-3-8b", 8_192),
    ("mistral-7b", 32_768),
    ("phi-3-mini", 4_096),
    ("phi-3-small", 8_192),
    ("gemma-2b", 8_192),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_is_four_chars_per_token() {
        assert_eq!(estimate_tokens("12345678"), 2);
    }

    #[test]
    fn non_chatterbox_provider_has_no_chatterbox_projection() {
        let config = UserVoiceConfig {
            provider: Provider::Piper,
            voice_id: "v1".to_string(),
            speed: 1.0,
            exaggeration: Some(0.5),
            cfg_weight: None,
            language: None,
        };
        assert!(config.get_chatterbox_config().is_none());
    }

    #[test]
    fn chatterbox_provider_projects_its_fields() {
        let config = UserVoiceConfig {
            provider: Provider::Chatterbox,
            voice_id: "v1".to_string(),
            speed: 1.0,
            exaggeration: Some(0.5),
            cfg_weight: Some(0.3),
            language: Some("en".to_string()),
        };
        let projected = config.get_chatterbox_config().unwrap();
        assert_eq!(projected.exaggeration, Some(0.5));
    }
}

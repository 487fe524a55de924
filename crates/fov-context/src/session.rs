//! Conversation sessions, per-user playback sessions, and the session
//! manager that owns both maps.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::confidence::{ConfidenceMonitor, ConfidenceAnalysis, ExpansionRecommendation};
use crate::context::ContextManager;
use crate::error::{FovError, FovResult};
use crate::types::{ConversationTurn, PlaybackState, SessionConfig, SessionEvent, TurnRole, UserVoiceConfig};

/// Lifecycle state of a conversation session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Playing,
    UserSpeaking,
    AiThinking,
    AiSpeaking,
    Paused,
    Ended,
}

impl SessionState {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::UserSpeaking => "user_speaking",
            Self::AiThinking => "ai_thinking",
            Self::AiSpeaking => "ai_speaking",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph:
    /// `idle -> playing -> {paused <-> playing, user_speaking,
    /// ai_thinking, ai_speaking} -> ended`. Any state (except `ended`)
    /// can end.
    const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{AiSpeaking, AiThinking, Ended, Idle, Paused, Playing, UserSpeaking};
        match (self, next) {
            (Ended, _) => false,
            (_, Ended) => true,
            (Idle, Playing) => true,
            (Playing, Paused | UserSpeaking | AiThinking | AiSpeaking) => true,
            (Paused, Playing) => true,
            (UserSpeaking | AiThinking | AiSpeaking, Playing) => true,
            _ => false,
        }
    }
}

/// Rolling counters surfaced by a conversation session.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionMetrics {
    pub total_turns: u64,
    pub barge_in_count: u64,
    pub expansion_count: u64,
}

/// One active tutoring conversation: lifecycle, history, context manager,
/// and confidence monitor.
pub struct ConversationSession {
    pub session_id: String,
    pub curriculum_id: String,
    state: SessionState,
    auto_expand_context: bool,
    context: ContextManager,
    confidence: ConfidenceMonitor,
    history: Vec<ConversationTurn>,
    events: Vec<SessionEvent>,
    metrics: SessionMetrics,
}

impl ConversationSession {
    #[must_use]
    pub fn new(curriculum_id: impl Into<String>, config: SessionConfig, now: DateTime<Utc>) -> Self {
        let context = ContextManager::for_model(&config.model_name, config.base_system_prompt, now);
        Self {
            session_id: Uuid::new_v4().to_string(),
            curriculum_id: curriculum_id.into(),
            state: SessionState::Idle,
            auto_expand_context: config.auto_expand_context,
            context,
            confidence: ConfidenceMonitor::default(),
            history: Vec::new(),
            events: Vec::new(),
            metrics: SessionMetrics::default(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    #[must_use]
    pub fn context_manager(&mut self) -> &mut ContextManager {
        &mut self.context
    }

    #[must_use]
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    #[must_use]
    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    /// Move to `next` if the lifecycle graph permits it; otherwise reject
    /// with [`FovError::InvalidTransition`].
    pub fn transition(&mut self, next: SessionState, now: DateTime<Utc>) -> FovResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(FovError::invalid_transition(self.state.label(), next.label()));
        }
        self.events.push(SessionEvent::new("transition", now, Some(format!("{} -> {}", self.state.label(), next.label()))));
        self.state = next;
        Ok(())
    }

    /// Append a user turn. `is_barge_in` also feeds the immediate buffer
    /// and increments the barge-in counter.
    pub fn add_user_turn(&mut self, content: impl Into<String>, is_barge_in: bool, now: DateTime<Utc>) {
        let content = content.into();
        if is_barge_in {
            self.context.record_barge_in(content.clone());
            self.metrics.barge_in_count += 1;
        }
        self.history.push(ConversationTurn::new(TurnRole::User, content, now, is_barge_in));
        self.metrics.total_turns += 1;
    }

    /// Append an assistant turn.
    pub fn add_assistant_turn(&mut self, content: impl Into<String>, now: DateTime<Utc>) {
        self.history.push(ConversationTurn::new(TurnRole::Assistant, content, now, false));
        self.metrics.total_turns += 1;
    }

    /// Analyze an assistant response for uncertainty, returning the
    /// analysis and — iff `auto_expand_context` is enabled — an expansion
    /// recommendation.
    pub fn process_response_with_confidence(
        &mut self,
        response: &str,
    ) -> (ConfidenceAnalysis, Option<ExpansionRecommendation>) {
        let analysis = self.confidence.analyze(response);
        if !self.auto_expand_context {
            return (analysis, None);
        }
        let recommendation = self.confidence.recommend_expansion(&analysis);
        if recommendation.should_expand {
            self.metrics.expansion_count += 1;
        }
        (analysis, Some(recommendation))
    }
}

/// A user's voice-driven playback session: voice config (shared-cache
/// key), playback position, and an optionally attached conversation.
pub struct UserSession {
    pub user_id: String,
    pub voice_config: UserVoiceConfig,
    pub playback_state: PlaybackState,
    pub conversation: Option<ConversationSession>,
    pub created_at: DateTime<Utc>,
}

impl UserSession {
    #[must_use]
    pub fn new(user_id: impl Into<String>, voice_config: UserVoiceConfig, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            voice_config,
            playback_state: PlaybackState::new(now),
            conversation: None,
            created_at: now,
        }
    }

    /// Update from a client heartbeat.
    pub fn heartbeat(&mut self, curriculum_id: Option<String>, topic_id: Option<String>, segment_index: i64, segment_offset_ms: i64, is_playing: bool, now: DateTime<Utc>) {
        self.playback_state.curriculum_id = curriculum_id;
        self.playback_state.topic_id = topic_id;
        self.playback_state.segment_index = segment_index;
        self.playback_state.segment_offset_ms = segment_offset_ms;
        self.playback_state.is_playing = is_playing;
        self.playback_state.last_heartbeat = now;
    }

    #[must_use]
    pub fn is_inactive(&self, now: DateTime<Utc>, max_inactive_minutes: i64) -> bool {
        (now - self.playback_state.last_heartbeat).num_minutes() >= max_inactive_minutes
    }
}

/// Owns every [`UserSession`] and standalone [`ConversationSession`],
/// behind one lock each, with periodic time-based cleanup.
pub struct SessionManager {
    user_sessions: RwLock<HashMap<String, Arc<RwLock<UserSession>>>>,
    conversation_sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self { user_sessions: RwLock::new(HashMap::new()), conversation_sessions: RwLock::new(HashMap::new()) }
    }

    /// Create (or replace) the one active session for `user_id`.
    pub async fn create_user_session(&self, user_id: impl Into<String>, voice_config: UserVoiceConfig, now: DateTime<Utc>) -> Arc<RwLock<UserSession>> {
        let user_id = user_id.into();
        let session = Arc::new(RwLock::new(UserSession::new(user_id.clone(), voice_config, now)));
        let mut sessions = self.user_sessions.write().await;
        if sessions.insert(user_id.clone(), session.clone()).is_some() {
            info!(user_id = %user_id, "replaced existing user session");
        }
        session
    }

    pub async fn get_user_session(&self, user_id: &str) -> Option<Arc<RwLock<UserSession>>> {
        self.user_sessions.read().await.get(user_id).cloned()
    }

    pub async fn remove_user_session(&self, user_id: &str) -> bool {
        self.user_sessions.write().await.remove(user_id).is_some()
    }

    pub async fn insert_conversation_session(&self, session: ConversationSession) -> String {
        let id = session.session_id.clone();
        self.conversation_sessions.write().await.insert(id.clone(), session);
        id
    }

    pub async fn end_conversation_session(&self, session_id: &str, now: DateTime<Utc>) -> FovResult<()> {
        let mut sessions = self.conversation_sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or_else(|| FovError::not_found(format!("conversation session {session_id}")))?;
        session.transition(SessionState::Ended, now)
    }

    /// Remove every user session whose last heartbeat is older than
    /// `max_inactive_minutes`.
    pub async fn cleanup_inactive_user_sessions(&self, max_inactive_minutes: i64, now: DateTime<Utc>) -> usize {
        let mut sessions = self.user_sessions.write().await;
        let mut stale = Vec::new();
        for (user_id, session) in sessions.iter() {
            if session.read().await.is_inactive(now, max_inactive_minutes) {
                stale.push(user_id.clone());
            }
        }
        let removed = stale.len();
        for user_id in stale {
            sessions.remove(&user_id);
        }
        if removed > 0 {
            warn!(removed, "evicted inactive user sessions");
        }
        removed
    }

    /// Remove every conversation session in the `Ended` state.
    pub async fn cleanup_ended_sessions(&self) -> usize {
        let mut sessions = self.conversation_sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.state() != SessionState::Ended);
        before - sessions.len()
    }

    #[must_use]
    pub async fn user_session_count(&self) -> usize {
        self.user_sessions.read().await.len()
    }

    #[must_use]
    pub async fn conversation_session_count(&self) -> usize {
        self.conversation_sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_core::Provider;

    fn voice_config() -> UserVoiceConfig {
        UserVoiceConfig {
            provider: Provider::Vibevoice,
            voice_id: "nova".to_string(),
            speed: 1.0,
            exaggeration: None,
            cfg_weight: None,
            language: None,
        }
    }

    fn session_config() -> SessionConfig {
        SessionConfig { model_name: "gpt-4o".to_string(), base_system_prompt: "You are a tutor.".to_string(), auto_expand_context: true }
    }

    #[test]
    fn idle_cannot_jump_directly_to_ai_speaking() {
        let mut session = ConversationSession::new("curr-1", session_config(), Utc::now());
        let result = session.transition(SessionState::AiSpeaking, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn idle_to_playing_to_paused_and_back_is_allowed() {
        let mut session = ConversationSession::new("curr-1", session_config(), Utc::now());
        session.transition(SessionState::Playing, Utc::now()).unwrap();
        session.transition(SessionState::Paused, Utc::now()).unwrap();
        session.transition(SessionState::Playing, Utc::now()).unwrap();
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[test]
    fn barge_in_turn_increments_counter_and_feeds_immediate_buffer() {
        let mut session = ConversationSession::new("curr-1", session_config(), Utc::now());
        session.add_user_turn("wait!", true, Utc::now());
        assert_eq!(session.metrics().barge_in_count, 1);
        let context = session.context_manager().build_context(&[], None);
        assert!(context.immediate_context.contains("wait!"));
    }

    #[test]
    fn response_with_auto_expand_off_never_recommends() {
        let mut config = session_config();
        config.auto_expand_context = false;
        let mut session = ConversationSession::new("curr-1", config, Utc::now());
        let (_, recommendation) = session.process_response_with_confidence("I don't have information about that.");
        assert!(recommendation.is_none());
    }

    #[tokio::test]
    async fn session_manager_replaces_single_active_user_session() {
        let manager = SessionManager::new();
        let now = Utc::now();
        manager.create_user_session("u1", voice_config(), now).await;
        manager.create_user_session("u1", voice_config(), now).await;
        assert_eq!(manager.user_session_count().await, 1);
    }

    #[tokio::test]
    async fn cleanup_evicts_sessions_past_inactivity_threshold() {
        let manager = SessionManager::new();
        let stale_time = Utc::now() - chrono::Duration::minutes(120);
        manager.create_user_session("u1", voice_config(), stale_time).await;

        let removed = manager.cleanup_inactive_user_sessions(60, Utc::now()).await;
        assert_eq!(removed, 1);
        assert_eq!(manager.user_session_count().await, 0);
    }
}

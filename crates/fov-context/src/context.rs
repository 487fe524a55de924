//! The bounded prompt builder that ties the four FOV buffers and a model
//! tier together into one rendering pipeline.

use chrono::{DateTime, Utc};

use crate::buffers::{truncate_to_budget, EpisodicBuffer, FovContext, ImmediateBuffer, LlmMessage, SemanticBuffer, WorkingBuffer};
use crate::model_tier::ModelTier;
use crate::types::{
    estimate_tokens, ConversationTurn, CurriculumPosition, GlossaryTerm, LearnerSignals, MisconceptionTrigger,
    PacePreference, TopicSummary, TurnRole,
};

/// Builds [`FovContext`]s for one conversation, holding the four buffers
/// and the per-tier budgets derived at construction time.
pub struct ContextManager {
    tier: ModelTier,
    base_system_prompt: String,
    immediate: ImmediateBuffer,
    working: WorkingBuffer,
    episodic: EpisodicBuffer,
    semantic: SemanticBuffer,
    conversation: Vec<ConversationTurn>,
}

impl ContextManager {
    /// Build a manager for `model_name`, deriving its tier from
    /// [`ModelTier::from_model_name`].
    #[must_use]
    pub fn for_model(model_name: &str, base_system_prompt: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_tier(ModelTier::from_model_name(model_name), base_system_prompt, now)
    }

    /// Build a manager for an explicit context-window size.
    #[must_use]
    pub fn for_context_window(window: u32, base_system_prompt: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_tier(ModelTier::from_context_window(window), base_system_prompt, now)
    }

    #[must_use]
    pub fn with_tier(tier: ModelTier, base_system_prompt: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tier,
            base_system_prompt: base_system_prompt.into(),
            immediate: ImmediateBuffer::default(),
            working: WorkingBuffer::default(),
            episodic: EpisodicBuffer::new(now),
            semantic: SemanticBuffer::default(),
            conversation: Vec::new(),
        }
    }

    #[must_use]
    pub const fn tier(&self) -> ModelTier {
        self.tier
    }

    #[must_use]
    pub fn max_conversation_turns(&self) -> usize {
        self.tier.budgets().max_conversation_turns
    }

    /// Append a turn to the conversation history and trim to
    /// `max_conversation_turns`.
    pub fn add_turn(&mut self, turn: ConversationTurn) {
        self.conversation.push(turn);
        self.trim_conversation();
    }

    fn trim_conversation(&mut self) {
        let max = self.max_conversation_turns();
        if self.conversation.len() > max {
            let excess = self.conversation.len() - max;
            self.conversation.drain(0..excess);
        }
    }

    /// Record the segment of transcript the learner interrupted, along
    /// with the playback position it happened at.
    pub fn set_current_segment(&mut self, text: impl Into<String>, position_ms: i64) {
        self.immediate.current_segment = Some(text.into());
        self.immediate.interrupted_at_position = Some(position_ms);
    }

    /// Record a barge-in utterance in the immediate buffer.
    pub fn record_barge_in(&mut self, utterance: impl Into<String>) {
        self.immediate.barge_in_utterance = Some(utterance.into());
    }

    /// Clear the barge-in state once it has been consumed by a context
    /// build.
    pub fn clear_barge_in(&mut self) {
        self.immediate.barge_in_utterance = None;
        self.immediate.current_segment = None;
        self.immediate.interrupted_at_position = None;
    }

    /// Switch the working buffer to a new topic, replacing objectives,
    /// glossary, and misconceptions wholesale.
    pub fn set_current_topic(
        &mut self,
        topic_id: impl Into<String>,
        topic_title: impl Into<String>,
        topic_content: impl Into<String>,
        learning_objectives: Vec<String>,
        glossary_terms: Vec<GlossaryTerm>,
        misconception_triggers: Vec<MisconceptionTrigger>,
    ) {
        self.working.topic_id = Some(topic_id.into());
        self.working.topic_title = Some(topic_title.into());
        self.working.topic_content = Some(topic_content.into());
        self.working.learning_objectives = learning_objectives;
        self.working.glossary_terms = glossary_terms;
        self.working.misconception_triggers = misconception_triggers;
    }

    /// Update the semantic buffer's curriculum position.
    pub fn set_curriculum_position(&mut self, position: CurriculumPosition) {
        self.semantic.position = Some(position);
    }

    pub fn set_curriculum_outline(&mut self, outline: impl Into<String>) {
        self.semantic.curriculum_outline = Some(outline.into());
    }

    pub fn set_prerequisite_topics(&mut self, topics: Vec<String>) {
        self.semantic.prerequisite_topics = topics;
    }

    pub fn set_upcoming_topics(&mut self, topics: Vec<String>) {
        self.semantic.upcoming_topics = topics;
    }

    /// Record a completed topic into the episodic buffer's bounded
    /// history.
    pub fn record_completion(&mut self, summary: TopicSummary) {
        self.episodic.push_topic_summary(summary);
    }

    /// Record a user question asked during the session.
    pub fn record_question(&mut self, question: impl Into<String>) {
        self.episodic.push_user_question(question.into());
    }

    pub fn increment_clarification_requests(&mut self) {
        self.episodic.learner_signals.clarification_requests += 1;
    }

    pub fn increment_repetition_requests(&mut self) {
        self.episodic.learner_signals.repetition_requests += 1;
    }

    pub fn increment_confusion_indicators(&mut self) {
        self.episodic.learner_signals.confusion_indicators += 1;
    }

    pub fn increment_topics_mastered(&mut self) {
        self.episodic.learner_signals.topics_mastered += 1;
    }

    pub fn add_struggling_concept(&mut self, concept: impl Into<String>) {
        self.episodic.learner_signals.struggling_concepts.push(concept.into());
    }

    pub fn set_pace_preference(&mut self, pace: PacePreference) {
        self.episodic.learner_signals.pace_preference = pace;
    }

    /// Reset every buffer, keeping the tier and base prompt.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.immediate = ImmediateBuffer::default();
        self.working = WorkingBuffer::default();
        self.episodic = EpisodicBuffer::new(now);
        self.semantic = SemanticBuffer::default();
        self.conversation.clear();
    }

    /// Build a bounded [`FovContext`] from `history`, with an optional
    /// barge-in utterance overriding whatever was previously recorded.
    ///
    /// Copies the last `max_conversation_turns` entries of `history` into
    /// the immediate buffer, then renders and truncates all four buffers
    /// to their per-tier budgets.
    #[must_use]
    pub fn build_context(&mut self, history: &[ConversationTurn], barge_in: Option<&str>) -> FovContext {
        let max_turns = self.max_conversation_turns();
        let start = history.len().saturating_sub(max_turns);
        self.immediate.recent_turns = history[start..].to_vec();
        if let Some(utterance) = barge_in {
            self.immediate.barge_in_utterance = Some(utterance.to_string());
        }

        let budgets = self.tier.budgets();
        let now = Utc::now();

        FovContext {
            base_system_prompt: self.base_system_prompt.clone(),
            curriculum_context: truncate_to_budget(&self.semantic.render(), budgets.semantic),
            current_topic: truncate_to_budget(&self.working.render(), budgets.working),
            session_context: truncate_to_budget(&self.episodic.render(now), budgets.episodic),
            immediate_context: truncate_to_budget(&self.immediate.render(), budgets.immediate),
        }
    }

    /// Build the `{role, content}` message list an LLM call expects: one
    /// combined system message followed by the last `max_conversation_turns`
    /// history entries.
    #[must_use]
    pub fn build_messages_for_llm(&mut self, history: &[ConversationTurn], barge_in: Option<&str>) -> Vec<LlmMessage> {
        let context = self.build_context(history, barge_in);
        let max_turns = self.max_conversation_turns();
        let start = history.len().saturating_sub(max_turns);

        let mut messages = Vec::with_capacity(1 + (history.len() - start));
        messages.push(LlmMessage { role: "system".to_string(), content: context.to_system_message() });
        for turn in &history[start..] {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            messages.push(LlmMessage { role: role.to_string(), content: turn.content.clone() });
        }
        messages
    }

    /// Debug-oriented snapshot of the manager's internal state, intended
    /// for operator introspection rather than programmatic use.
    #[must_use]
    pub fn state_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "tier": format!("{:?}", self.tier),
            "conversation_turns": self.conversation.len(),
            "has_barge_in": self.immediate.barge_in_utterance.is_some(),
            "topic_id": self.working.topic_id,
            "topic_summaries": self.episodic.topic_summaries.len(),
            "user_questions": self.episodic.user_questions.len(),
            "upcoming_topics": self.semantic.upcoming_topics.len(),
        })
    }

    #[must_use]
    pub fn conversation(&self) -> &[ConversationTurn] {
        &self.conversation
    }
}

#[must_use]
pub fn estimate_message_tokens(messages: &[LlmMessage]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: TurnRole) -> ConversationTurn {
        ConversationTurn::new(role, "x".repeat(200), Utc::now(), false)
    }

    #[test]
    fn cloud_tier_trims_history_to_max_turns_plus_system() {
        let mut manager = ContextManager::for_model("claude-3-opus", "base prompt", Utc::now());
        assert_eq!(manager.tier(), ModelTier::Cloud);

        let history: Vec<ConversationTurn> = (0..25)
            .map(|i| turn(if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant }))
            .collect();

        let messages = manager.build_messages_for_llm(&history, None);
        assert_eq!(messages.len(), 21);
    }

    #[test]
    fn rendered_system_message_respects_total_budget() {
        let mut manager = ContextManager::for_context_window(100_000, "base", Utc::now());
        manager.set_curriculum_position(CurriculumPosition {
            curriculum_id: "c".into(),
            title: "Biology".into(),
            current_topic_index: 2,
            total_topics: 10,
            unit_title: None,
            module_title: None,
        });
        let history: Vec<ConversationTurn> = (0..25).map(|_| turn(TurnRole::User)).collect();
        let context = manager.build_context(&history, None);
        let system_message = context.to_system_message();
        assert!(system_message.len() <= 12_000 * 4 + 512);
    }

    #[test]
    fn build_context_surfaces_barge_in_override() {
        let mut manager = ContextManager::for_context_window(4_000, "base", Utc::now());
        let context = manager.build_context(&[], Some("wait, what did you say?"));
        assert!(context.immediate_context.contains("wait, what did you say?"));
    }

    #[test]
    fn reset_clears_conversation_and_buffers() {
        let mut manager = ContextManager::for_context_window(4_000, "base", Utc::now());
        manager.add_turn(ConversationTurn::new(TurnRole::User, "hi", Utc::now(), false));
        manager.record_barge_in("oops");
        manager.reset(Utc::now());
        assert!(manager.conversation().is_empty());
        assert!(manager.build_context(&[], None).immediate_context.is_empty());
    }
}

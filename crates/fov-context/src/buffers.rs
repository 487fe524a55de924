//! The four FOV buffers and the rendering pipeline that turns them into a
//! bounded system prompt.

use chrono::{DateTime, Utc};

use crate::types::{
    estimate_tokens, ConversationTurn, CurriculumPosition, GlossaryTerm, LearnerSignals, MisconceptionTrigger,
    TopicSummary, TurnRole,
};

/// Truncate `text` to fit within `budget` tokens using the policy shared by
/// every buffer: if the estimated token count (chars/4) exceeds the
/// budget, hard-cut at `budget*4 - 3` chars and append `"..."`. A budget of
/// zero always renders empty.
#[must_use]
pub fn truncate_to_budget(text: &str, budget: usize) -> String {
    if budget == 0 {
        return String::new();
    }
    if estimate_tokens(text) <= budget {
        return text.to_string();
    }
    let max_chars = budget * 4;
    let cut = max_chars.saturating_sub(3);
    let truncated: String = text.chars().take(cut).collect();
    format!("{truncated}...")
}

/// Recent conversational state: the last N turns plus anything the learner
/// interrupted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImmediateBuffer {
    pub recent_turns: Vec<ConversationTurn>,
    pub barge_in_utterance: Option<String>,
    pub current_segment: Option<String>,
    pub interrupted_at_position: Option<i64>,
}

impl ImmediateBuffer {
    /// Render sections highest-priority first, so that a budget cut
    /// sacrifices the oldest turns rather than the barge-in/interruption
    /// context: `[USER INTERRUPTED]`, `[INTERRUPTED CONTENT]`, then turns
    /// newest-first.
    #[must_use]
    pub fn render(&self) -> String {
        let mut sections = Vec::new();
        if let Some(utterance) = &self.barge_in_utterance {
            sections.push(format!("[USER INTERRUPTED]: {utterance}"));
        }
        if let Some(segment) = &self.current_segment {
            sections.push(format!("[INTERRUPTED CONTENT]: {segment}"));
        }
        for turn in self.recent_turns.iter().rev() {
            let role = match turn.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Assistant",
            };
            sections.push(format!("{role}: {}", turn.content));
        }
        sections.join("\n")
    }
}

/// The topic currently being taught.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkingBuffer {
    pub topic_id: Option<String>,
    pub topic_title: Option<String>,
    pub topic_content: Option<String>,
    pub learning_objectives: Vec<String>,
    pub glossary_terms: Vec<GlossaryTerm>,
    pub misconception_triggers: Vec<MisconceptionTrigger>,
}

impl WorkingBuffer {
    #[must_use]
    pub fn render(&self) -> String {
        let mut sections = Vec::new();

        if let Some(title) = &self.topic_title {
            sections.push(format!("CURRENT TOPIC: {title}"));
        }

        if !self.learning_objectives.is_empty() {
            let bullets: Vec<String> = self.learning_objectives.iter().map(|o| format!("- {o}")).collect();
            sections.push(format!("LEARNING OBJECTIVES:\n{}", bullets.join("\n")));
        }

        if let Some(content) = &self.topic_content {
            sections.push(format!("TOPIC OUTLINE:\n{content}"));
        }

        if !self.glossary_terms.is_empty() {
            let bullets: Vec<String> = self
                .glossary_terms
                .iter()
                .take(5)
                .map(|t| format!("- {}: {}", t.term, t.definition))
                .collect();
            sections.push(format!("KEY TERMS:\n{}", bullets.join("\n")));
        }

        if !self.misconception_triggers.is_empty() {
            let bullets: Vec<String> = self
                .misconception_triggers
                .iter()
                .take(3)
                .map(|m| format!("- {}", m.trigger_phrase))
                .collect();
            sections.push(format!("COMMON MISCONCEPTIONS:\n{}", bullets.join("\n")));
        }

        sections.join("\n\n")
    }
}

/// Rolling history of the session so far: recently completed topics, the
/// learner's recent questions, and engagement signals.
#[derive(Clone, Debug, PartialEq)]
pub struct EpisodicBuffer {
    pub topic_summaries: Vec<TopicSummary>,
    pub user_questions: Vec<String>,
    pub learner_signals: LearnerSignals,
    pub session_start: DateTime<Utc>,
}

impl EpisodicBuffer {
    #[must_use]
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            topic_summaries: Vec::new(),
            user_questions: Vec::new(),
            learner_signals: LearnerSignals::default(),
            session_start,
        }
    }

    /// Append a topic summary, keeping only the 10 most recent.
    pub fn push_topic_summary(&mut self, summary: TopicSummary) {
        self.topic_summaries.push(summary);
        if self.topic_summaries.len() > 10 {
            self.topic_summaries.remove(0);
        }
    }

    /// Append a user question, keeping only the 10 most recent.
    pub fn push_user_question(&mut self, question: String) {
        self.user_questions.push(question);
        if self.user_questions.len() > 10 {
            self.user_questions.remove(0);
        }
    }

    #[must_use]
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut sections = Vec::new();

        let duration_minutes = (now - self.session_start).num_seconds().max(0) as f64 / 60.0;
        sections.push(format!(
            "SESSION: started {}, {duration_minutes:.1} minutes ago",
            self.session_start.to_rfc3339()
        ));

        let signals = &self.learner_signals;
        let mut signal_lines = Vec::new();
        if signals.clarification_requests > 0 {
            signal_lines.push(format!("clarification requests: {}", signals.clarification_requests));
        }
        if signals.repetition_requests > 0 {
            signal_lines.push(format!("repetition requests: {}", signals.repetition_requests));
        }
        if signals.confusion_indicators > 0 {
            signal_lines.push(format!("confusion indicators: {}", signals.confusion_indicators));
        }
        if signals.topics_mastered > 0 {
            signal_lines.push(format!("topics mastered: {}", signals.topics_mastered));
        }
        if !signals.struggling_concepts.is_empty() {
            signal_lines.push(format!("struggling with: {}", signals.struggling_concepts.join(", ")));
        }
        signal_lines.push(format!("pace preference: {:?}", signals.pace_preference));
        sections.push(format!("LEARNER SIGNALS:\n{}", signal_lines.join("\n")));

        if !self.topic_summaries.is_empty() {
            let lines: Vec<String> = self
                .topic_summaries
                .iter()
                .rev()
                .take(5)
                .map(|s| format!("- {} ({:.0}% mastery): {}", s.title, s.mastery * 100.0, s.summary))
                .collect();
            sections.push(format!("RECENT TOPICS:\n{}", lines.join("\n")));
        }

        if !self.user_questions.is_empty() {
            let lines: Vec<String> =
                self.user_questions.iter().rev().take(3).map(|q| format!("- {q}")).collect();
            sections.push(format!("RECENT QUESTIONS:\n{}", lines.join("\n")));
        }

        sections.join("\n\n")
    }
}

/// Where the learner sits in the curriculum outline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SemanticBuffer {
    pub curriculum_outline: Option<String>,
    pub position: Option<CurriculumPosition>,
    pub prerequisite_topics: Vec<String>,
    pub upcoming_topics: Vec<String>,
}

impl SemanticBuffer {
    #[must_use]
    pub fn render(&self) -> String {
        let mut sections = Vec::new();

        if let Some(position) = &self.position {
            sections.push(format!(
                "{} — Topic {}/{}",
                position.title,
                position.current_topic_index + 1,
                position.total_topics
            ));
        }

        if let Some(outline) = &self.curriculum_outline {
            sections.push(format!("OUTLINE:\n{outline}"));
        }

        if !self.prerequisite_topics.is_empty() {
            let lines: Vec<String> =
                self.prerequisite_topics.iter().take(3).map(|t| format!("- {t}")).collect();
            sections.push(format!("PREREQUISITES:\n{}", lines.join("\n")));
        }

        if !self.upcoming_topics.is_empty() {
            let lines: Vec<String> = self.upcoming_topics.iter().take(3).map(|t| format!("- {t}")).collect();
            sections.push(format!("UPCOMING:\n{}", lines.join("\n")));
        }

        sections.join("\n\n")
    }
}

/// One LLM-bound chat message.
#[derive(Clone, Debug, PartialEq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

/// The four rendered buffer strings plus the base system prompt,
/// ready to become a single system message.
#[derive(Clone, Debug, PartialEq)]
pub struct FovContext {
    pub base_system_prompt: String,
    pub curriculum_context: String,
    pub current_topic: String,
    pub session_context: String,
    pub immediate_context: String,
}

impl FovContext {
    /// Concatenate every section under labelled headers, in curriculum →
    /// topic → session → immediate order (broadest context first, most
    /// urgent last, adjacent to where the model's attention is sharpest).
    #[must_use]
    pub fn to_system_message(&self) -> String {
        format!(
            "{}\n\n=== CURRICULUM CONTEXT ===\n{}\n\n=== CURRENT TOPIC ===\n{}\n\n=== SESSION CONTEXT ===\n{}\n\n=== IMMEDIATE CONTEXT ===\n{}",
            self.base_system_prompt,
            self.curriculum_context,
            self.current_topic,
            self.session_context,
            self.immediate_context,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_hard_cuts_and_appends_ellipsis() {
        let text = "a".repeat(100);
        let truncated = truncate_to_budget(&text, 5);
        assert_eq!(truncated.chars().count(), 20);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn text_within_budget_is_unchanged() {
        let text = "short text";
        assert_eq!(truncate_to_budget(text, 100), text);
    }

    #[test]
    fn zero_budget_renders_empty() {
        assert_eq!(truncate_to_budget("anything", 0), "");
    }

    #[test]
    fn immediate_buffer_orders_barge_in_before_turns() {
        let mut buffer = ImmediateBuffer::default();
        buffer.barge_in_utterance = Some("wait, what?".to_string());
        buffer.recent_turns.push(ConversationTurn::new(TurnRole::User, "hello", Utc::now(), false));
        let rendered = buffer.render();
        assert!(rendered.starts_with("[USER INTERRUPTED]"));
    }

    #[test]
    fn episodic_buffer_caps_topic_summaries_at_ten() {
        let mut buffer = EpisodicBuffer::new(Utc::now());
        for i in 0..15 {
            buffer.push_topic_summary(TopicSummary {
                topic_id: format!("t{i}"),
                title: format!("Topic {i}"),
                summary: "summary".to_string(),
                mastery: 0.5,
            });
        }
        assert_eq!(buffer.topic_summaries.len(), 10);
        assert_eq!(buffer.topic_summaries[0].topic_id, "t5");
    }

    #[test]
    fn semantic_buffer_renders_one_indexed_progress() {
        let mut buffer = SemanticBuffer::default();
        buffer.position = Some(CurriculumPosition {
            curriculum_id: "c1".to_string(),
            title: "Algebra".to_string(),
            current_topic_index: 2,
            total_topics: 10,
            unit_title: None,
            module_title: None,
        });
        assert!(buffer.render().contains("Topic 3/10"));
    }
}

//! Foveated conversational context manager, confidence monitor, and
//! session layer: the bounded-prompt machinery that sits between a voice
//! tutoring session and its LLM calls.

#![deny(unsafe_code)]

pub mod buffers;
pub mod confidence;
pub mod context;
pub mod error;
pub mod model_tier;
pub mod session;
pub mod types;

pub use buffers::{EpisodicBuffer, FovContext, ImmediateBuffer, LlmMessage, SemanticBuffer, WorkingBuffer};
pub use confidence::{
    ConfidenceAnalysis, ConfidenceMonitor, ConfidenceTrend, ExpansionPriority, ExpansionRecommendation,
    ExpansionScope, MarkerKind,
};
pub use context::{estimate_message_tokens, ContextManager};
pub use error::{FovError, FovResult};
pub use model_tier::ModelTier;
pub use session::{ConversationSession, SessionManager, SessionMetrics, SessionState, UserSession};
pub use types::{
    estimate_tokens, AdaptiveBudgetConfig, ConversationTurn, CurriculumPosition, GlossaryTerm, LearnerSignals,
    MisconceptionTrigger, PacePreference, PlaybackState, SessionConfig, SessionEvent, TopicSummary, TurnRole,
    UserVoiceConfig, MODEL_CONTEXT_WINDOWS,
};

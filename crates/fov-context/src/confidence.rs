//! Pattern-based uncertainty scoring over LLM outputs, trend tracking, and
//! context-expansion recommendation. Never fails: the worst case is a
//! neutral score, never an error.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Rolling window size for confidence scores, matched against the
/// episodic buffer's bounded-list convention.
const ROLLING_WINDOW: usize = 10;

/// Default weight given to a hedging phrase when none of the literal
/// table entries match but the composite still needs a lower bound.
const DEFAULT_EXPANSION_THRESHOLD: f64 = 0.5;

/// Hedging phrases and their weight, checked against lowercased text.
/// Hand-tuned; tests assert the literal table rather than "reasonable
/// behavior".
const HEDGING_WEIGHTS: &[(&str, f64)] = &[
    ("i'm not sure", 0.8),
    ("i am not sure", 0.8),
    ("i'm not certain", 0.8),
    ("not entirely sure", 0.7),
    ("i think", 0.4),
    ("i believe", 0.4),
    ("possibly", 0.5),
    ("perhaps", 0.5),
    ("maybe", 0.6),
    ("it's possible that", 0.5),
    ("i'm guessing", 0.7),
    ("correct me if", 0.6),
];

/// Deflection phrases — the model is refusing or stepping outside its
/// remit rather than expressing doubt about a fact.
const DEFLECTION_PATTERNS: &[(&str, f64)] = &[
    (r"i can'?t help with that", 0.8),
    (r"i'?m unable to (assist|help) with", 0.8),
    (r"(outside|beyond) (my|the) scope", 0.8),
    (r"that'?s not something i can", 0.7),
];

/// Knowledge-gap phrases — the model is explicitly saying it lacks the
/// relevant information, the strongest single-marker signal.
const KNOWLEDGE_GAP_PATTERNS: &[(&str, f64)] = &[
    (r"i don'?t have (information|data|details) (about|on)", 0.9),
    (r"i don'?t have access to", 0.8),
    (r"that (information|data) (is not|isn'?t) available to me", 0.8),
    (r"i'?m not aware of", 0.7),
];

/// Vague-language words, each contributing up to 3 occurrences to the
/// weighted sum before length normalization.
const VAGUE_WORD_WEIGHTS: &[(&str, f64)] = &[
    ("something", 0.3),
    ("somewhat", 0.3),
    ("kind of", 0.3),
    ("sort of", 0.3),
    ("stuff", 0.3),
    ("things", 0.2),
    ("generally", 0.2),
    ("usually", 0.2),
    ("often", 0.2),
];

/// Composite-uncertainty component weights.
const HEDGING_WEIGHT: f64 = 0.25;
const DEFLECTION_WEIGHT: f64 = 0.3;
const GAP_WEIGHT: f64 = 0.35;
const VAGUE_WEIGHT: f64 = 0.1;

/// Which family of marker fired, used to pick an expansion scope.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Hedging,
    Deflection,
    KnowledgeGap,
    Vague,
}

impl MarkerKind {
    /// Markers that alone are strong enough to force expansion regardless
    /// of the composite score (deflection, knowledge gap).
    #[must_use]
    pub const fn is_high_signal(self) -> bool {
        matches!(self, Self::Deflection | Self::KnowledgeGap)
    }
}

/// Per-family scores plus the composite, for one analyzed response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceAnalysis {
    pub hedging_score: f64,
    pub deflection_score: f64,
    pub knowledge_gap_score: f64,
    pub vague_score: f64,
    pub uncertainty: f64,
    pub confidence: f64,
    pub markers: Vec<MarkerKind>,
}

/// Direction of the last three scores vs. the scores before them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTrend {
    Improving,
    Declining,
    Stable,
}

/// How urgently expanded context should be fetched.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionPriority {
    High,
    Medium,
    Low,
}

/// How much curriculum context to pull in when expanding.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionScope {
    CurrentTopic,
    CurrentUnit,
    RelatedTopics,
    FullCurriculum,
}

/// Emitted when the monitor judges that the tutoring context should widen.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExpansionRecommendation {
    pub should_expand: bool,
    pub priority: ExpansionPriority,
    pub scope: ExpansionScope,
    pub reason: String,
}

fn score_hedging(lowered: &str) -> (f64, bool) {
    let mut total = 0.0;
    let mut count = 0usize;
    for (phrase, weight) in HEDGING_WEIGHTS {
        if lowered.contains(phrase) {
            total += weight;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, false);
    }
    ((total / count.max(1) as f64).min(1.0), true)
}

fn score_regex_max(lowered: &str, table: &[(&str, f64)]) -> (f64, bool) {
    let mut best = 0.0_f64;
    let mut hit = false;
    for (pattern, weight) in table {
        let re = regex::Regex::new(pattern).expect("literal confidence-monitor pattern is valid regex");
        if re.is_match(lowered) {
            hit = true;
            if *weight > best {
                best = *weight;
            }
        }
    }
    (best, hit)
}

fn score_vague(lowered: &str) -> (f64, bool) {
    let mut total = 0.0;
    let mut hit = false;
    for (word, weight) in VAGUE_WORD_WEIGHTS {
        let occurrences = lowered.matches(word).count().min(3);
        if occurrences > 0 {
            hit = true;
            total += weight * occurrences as f64;
        }
    }
    let normalizer = 1.0 + (500.min(lowered.len()) as f64 / 500.0);
    (total / normalizer, hit)
}

/// Analyze one LLM response for uncertainty markers and track it in a
/// bounded rolling window. Never panics or returns an error; an input
/// with no markers simply scores fully confident.
pub struct ConfidenceMonitor {
    expansion_threshold: f64,
    history: VecDeque<f64>,
}

impl Default for ConfidenceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_EXPANSION_THRESHOLD)
    }
}

impl ConfidenceMonitor {
    #[must_use]
    pub fn new(expansion_threshold: f64) -> Self {
        Self { expansion_threshold, history: VecDeque::with_capacity(ROLLING_WINDOW) }
    }

    /// Score `response`, push it onto the rolling window (dropping the
    /// oldest entry past [`ROLLING_WINDOW`]), and return the analysis.
    pub fn analyze(&mut self, response: &str) -> ConfidenceAnalysis {
        let lowered = response.to_lowercase();

        let (hedging_score, hedging_hit) = score_hedging(&lowered);
        let (deflection_score, deflection_hit) = score_regex_max(&lowered, DEFLECTION_PATTERNS);
        let (knowledge_gap_score, gap_hit) = score_regex_max(&lowered, KNOWLEDGE_GAP_PATTERNS);
        let (vague_score, vague_hit) = score_vague(&lowered);

        let uncertainty = (hedging_score * HEDGING_WEIGHT
            + deflection_score * DEFLECTION_WEIGHT
            + knowledge_gap_score * GAP_WEIGHT
            + vague_score * VAGUE_WEIGHT)
            .clamp(0.0, 1.0);
        let confidence = (1.0 - uncertainty).clamp(0.0, 1.0);

        let mut markers = Vec::new();
        if hedging_hit {
            markers.push(MarkerKind::Hedging);
        }
        if deflection_hit {
            markers.push(MarkerKind::Deflection);
        }
        if gap_hit {
            markers.push(MarkerKind::KnowledgeGap);
        }
        if vague_hit {
            markers.push(MarkerKind::Vague);
        }

        if self.history.len() == ROLLING_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(confidence);

        ConfidenceAnalysis {
            hedging_score,
            deflection_score,
            knowledge_gap_score,
            vague_score,
            uncertainty,
            confidence,
            markers,
        }
    }

    /// Compare the mean of the last 3 scores against the mean of whatever
    /// came before them. Needs at least 3 scores to say anything but
    /// `Stable`.
    #[must_use]
    pub fn trend(&self) -> ConfidenceTrend {
        if self.history.len() < 3 {
            return ConfidenceTrend::Stable;
        }
        let scores: Vec<f64> = self.history.iter().copied().collect();
        let split = scores.len() - 3;
        let recent = &scores[split..];
        let older = &scores[..split];

        let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;
        let diff = if older.is_empty() {
            0.0
        } else {
            let older_mean = older.iter().sum::<f64>() / older.len() as f64;
            recent_mean - older_mean
        };

        if diff > 0.1 {
            ConfidenceTrend::Improving
        } else if diff < -0.1 {
            ConfidenceTrend::Declining
        } else {
            ConfidenceTrend::Stable
        }
    }

    /// Decide whether the tutoring loop should fetch expanded curriculum
    /// context, given the latest analysis.
    #[must_use]
    pub fn recommend_expansion(&self, analysis: &ConfidenceAnalysis) -> ExpansionRecommendation {
        let trend = self.trend();
        let high_signal = analysis.markers.iter().any(|m| m.is_high_signal());
        let declining = trend == ConfidenceTrend::Declining;

        let should_expand = analysis.confidence < self.expansion_threshold || high_signal || declining;

        let priority = if analysis.confidence < 0.3 {
            ExpansionPriority::High
        } else if analysis.confidence < 0.5 {
            ExpansionPriority::Medium
        } else {
            ExpansionPriority::Low
        };

        let scope = if analysis.markers.contains(&MarkerKind::Deflection) {
            ExpansionScope::RelatedTopics
        } else if analysis.markers.contains(&MarkerKind::KnowledgeGap) {
            ExpansionScope::FullCurriculum
        } else if declining {
            ExpansionScope::CurrentUnit
        } else {
            ExpansionScope::CurrentTopic
        };

        let reason = if analysis.markers.contains(&MarkerKind::KnowledgeGap) {
            "response signaled a knowledge gap".to_string()
        } else if analysis.markers.contains(&MarkerKind::Deflection) {
            "response deflected outside its scope".to_string()
        } else if declining {
            "confidence trend is declining".to_string()
        } else {
            format!("confidence {:.2} below threshold {:.2}", analysis.confidence, self.expansion_threshold)
        };

        ExpansionRecommendation { should_expand, priority, scope, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_gap_response_recommends_full_curriculum_expansion() {
        let mut monitor = ConfidenceMonitor::default();
        let analysis = monitor.analyze("I don't have information about that specific topic.");
        assert!(analysis.markers.contains(&MarkerKind::KnowledgeGap));

        let recommendation = monitor.recommend_expansion(&analysis);
        assert!(recommendation.should_expand);
        assert_eq!(recommendation.scope, ExpansionScope::FullCurriculum);
    }

    #[test]
    fn confident_response_has_no_markers() {
        let mut monitor = ConfidenceMonitor::default();
        let analysis = monitor.analyze("Mitochondria are the organelles that produce ATP through respiration.");
        assert!(analysis.markers.is_empty());
        assert!(analysis.confidence > 0.9);
    }

    #[test]
    fn trend_requires_at_least_three_scores() {
        let mut monitor = ConfidenceMonitor::default();
        monitor.analyze("Confident answer one.");
        monitor.analyze("Confident answer two.");
        assert_eq!(monitor.trend(), ConfidenceTrend::Stable);
    }

    #[test]
    fn declining_trend_is_detected_from_falling_scores() {
        let mut monitor = ConfidenceMonitor::default();
        for _ in 0..3 {
            monitor.analyze("This is a perfectly confident statement of fact.");
        }
        for _ in 0..3 {
            monitor.analyze("I'm not sure, maybe, I think perhaps this is possibly right.");
        }
        assert_eq!(monitor.trend(), ConfidenceTrend::Declining);
    }

    #[test]
    fn rolling_window_drops_oldest_past_ten() {
        let mut monitor = ConfidenceMonitor::default();
        for _ in 0..15 {
            monitor.analyze("neutral response with no markers at all");
        }
        assert_eq!(monitor.history.len(), ROLLING_WINDOW);
    }

    #[test]
    fn deflection_recommends_related_topics_scope() {
        let mut monitor = ConfidenceMonitor::default();
        let analysis = monitor.analyze("I can't help with that, it's outside my scope.");
        let recommendation = monitor.recommend_expansion(&analysis);
        assert_eq!(recommendation.scope, ExpansionScope::RelatedTopics);
        assert_eq!(recommendation.priority, ExpansionPriority::High);
    }
}

//! Knowledge-bowl content segmentation: turning a module's question tree
//! into a flat list of speakable text segments.

use serde::{Deserialize, Serialize};

/// The kind of spoken content a segment represents.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KbSegmentType {
    Question,
    Answer,
    Hint,
    Explanation,
}

impl KbSegmentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Hint => "hint",
            Self::Explanation => "explanation",
        }
    }
}

/// One piece of KB content to be converted to audio.
#[derive(Clone, Debug, PartialEq)]
pub struct KbSegment {
    pub question_id: String,
    pub segment_type: KbSegmentType,
    pub text: String,
    /// Index within a question's hint list; meaningful only when
    /// `segment_type` is `Hint`.
    pub hint_index: usize,
}

impl KbSegment {
    /// Filename this segment is stored under within its question directory.
    #[must_use]
    pub fn filename(&self) -> String {
        match self.segment_type {
            KbSegmentType::Hint => format!("hint_{}.wav", self.hint_index),
            other => format!("{}.wav", other.as_str()),
        }
    }

    /// The manifest key this segment is indexed under within its question's
    /// segment map.
    #[must_use]
    pub fn manifest_key(&self) -> String {
        match self.segment_type {
            KbSegmentType::Hint => format!("hint_{}", self.hint_index),
            other => other.as_str().to_string(),
        }
    }
}

/// Walk a module's JSON content (`{"domains": [{"questions": [...]}]}`) and
/// produce every speakable segment: question text, answer text, each hint,
/// and any explanation. Questions or fields that are absent or empty are
/// silently skipped; not every field is required on a question.
#[must_use]
pub fn extract_segments(module_content: &serde_json::Value) -> Vec<KbSegment> {
    let mut segments = Vec::new();

    let Some(domains) = module_content.get("domains").and_then(|d| d.as_array()) else {
        return segments;
    };

    for domain in domains {
        let Some(questions) = domain.get("questions").and_then(|q| q.as_array()) else {
            continue;
        };
        for question in questions {
            let Some(qid) = question.get("id").and_then(|v| v.as_str()) else {
                continue;
            };

            if let Some(text) = non_empty_str(question, "question_text") {
                segments.push(KbSegment {
                    question_id: qid.to_string(),
                    segment_type: KbSegmentType::Question,
                    text,
                    hint_index: 0,
                });
            }

            if let Some(text) = non_empty_str(question, "answer_text") {
                segments.push(KbSegment {
                    question_id: qid.to_string(),
                    segment_type: KbSegmentType::Answer,
                    text,
                    hint_index: 0,
                });
            }

            if let Some(hints) = question.get("hints").and_then(|h| h.as_array()) {
                for (i, hint) in hints.iter().enumerate() {
                    if let Some(text) = hint.as_str().filter(|t| !t.is_empty()) {
                        segments.push(KbSegment {
                            question_id: qid.to_string(),
                            segment_type: KbSegmentType::Hint,
                            text: text.to_string(),
                            hint_index: i,
                        });
                    }
                }
            }

            if let Some(text) = non_empty_str(question, "explanation") {
                segments.push(KbSegment {
                    question_id: qid.to_string(),
                    segment_type: KbSegmentType::Explanation,
                    text,
                    hint_index: 0,
                });
            }
        }
    }

    segments
}

fn non_empty_str(value: &serde_json::Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_all_segment_kinds() {
        let content = json!({
            "domains": [{
                "questions": [{
                    "id": "q1",
                    "question_text": "What is 2+2?",
                    "answer_text": "4",
                    "hints": ["think addition", "count on fingers"],
                    "explanation": "Basic arithmetic."
                }]
            }]
        });

        let segments = extract_segments(&content);
        assert_eq!(segments.len(), 5);
        assert_eq!(segments[2].segment_type, KbSegmentType::Hint);
        assert_eq!(segments[2].hint_index, 0);
        assert_eq!(segments[3].hint_index, 1);
    }

    #[test]
    fn skips_missing_optional_fields() {
        let content = json!({
            "domains": [{
                "questions": [{"id": "q1", "question_text": "Only this"}]
            }]
        });
        let segments = extract_segments(&content);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].segment_type, KbSegmentType::Question);
    }

    #[test]
    fn hint_filename_includes_index() {
        let s = KbSegment {
            question_id: "q1".to_string(),
            segment_type: KbSegmentType::Hint,
            text: "x".to_string(),
            hint_index: 2,
        };
        assert_eq!(s.filename(), "hint_2.wav");
        assert_eq!(s.manifest_key(), "hint_2");
    }

    #[test]
    fn empty_module_yields_no_segments() {
        assert!(extract_segments(&json!({})).is_empty());
    }
}

//! The per-module manifest of pre-generated audio, plus coverage reporting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one cached KB audio file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KbAudioEntry {
    pub question_id: String,
    pub segment_type: String,
    pub file_path: String,
    pub size_bytes: u64,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub created_at: DateTime<Utc>,
    pub hint_index: usize,
}

/// Tracks every pre-generated audio file for one module, keyed by question
/// id and then by segment key (`"question"`, `"answer"`, `"hint_0"`, ...).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KbManifest {
    pub module_id: String,
    pub voice_id: String,
    pub provider: String,
    pub generated_at: DateTime<Utc>,
    pub total_questions: usize,
    pub total_segments: usize,
    pub total_size_bytes: u64,
    pub total_duration_seconds: f64,
    pub segments: HashMap<String, HashMap<String, KbAudioEntry>>,
}

impl KbManifest {
    #[must_use]
    pub fn new(module_id: String, voice_id: String, provider: String) -> Self {
        Self {
            module_id,
            voice_id,
            provider,
            generated_at: Utc::now(),
            total_questions: 0,
            total_segments: 0,
            total_size_bytes: 0,
            total_duration_seconds: 0.0,
            segments: HashMap::new(),
        }
    }

    /// Record one generated (or already-present) entry into the manifest.
    pub fn add_entry(&mut self, entry: KbAudioEntry) {
        let key = if entry.segment_type == "hint" {
            format!("hint_{}", entry.hint_index)
        } else {
            entry.segment_type.clone()
        };
        self.total_size_bytes += entry.size_bytes;
        self.total_duration_seconds += entry.duration_seconds;
        self.segments.entry(entry.question_id.clone()).or_default().insert(key, entry);
    }
}

/// Coverage of pre-generated audio against a module's current content.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KbCoverageStatus {
    pub module_id: String,
    pub total_questions: usize,
    pub covered_questions: usize,
    pub total_segments: usize,
    pub covered_segments: usize,
    pub missing_segments: usize,
    pub total_size_bytes: u64,
    pub is_complete: bool,
}

impl KbCoverageStatus {
    /// Percentage of segments covered, rounded to one decimal place.
    #[must_use]
    pub fn coverage_percent(&self) -> f64 {
        if self.total_segments == 0 {
            return 0.0;
        }
        ((self.covered_segments as f64 / self.total_segments as f64) * 1000.0).round() / 10.0
    }
}

/// Lifecycle state of a module pre-generation job.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KbJobStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed,
}

impl KbJobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Cancelled | Self::Failed
        )
    }
}

/// Progress for one module pre-generation job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KbPrefetchProgress {
    pub job_id: String,
    pub module_id: String,
    pub total_segments: usize,
    pub completed: usize,
    pub cached: usize,
    pub generated: usize,
    pub failed: usize,
    pub status: KbJobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl KbPrefetchProgress {
    #[must_use]
    pub fn new(job_id: String, module_id: String, total_segments: usize) -> Self {
        Self {
            job_id,
            module_id,
            total_segments,
            completed: 0,
            cached: 0,
            generated: 0,
            failed: 0,
            status: KbJobStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.total_segments == 0 {
            return 100.0;
        }
        ((self.completed as f64 / self.total_segments as f64) * 1000.0).round() / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_percent_rounds_to_one_decimal() {
        let status = KbCoverageStatus {
            module_id: "m".to_string(),
            total_questions: 1,
            covered_questions: 1,
            total_segments: 3,
            covered_segments: 1,
            missing_segments: 2,
            total_size_bytes: 0,
            is_complete: false,
        };
        assert_eq!(status.coverage_percent(), 33.3);
    }

    #[test]
    fn manifest_accumulates_totals() {
        let mut manifest = KbManifest::new("m1".to_string(), "nova".to_string(), "vibevoice".to_string());
        manifest.add_entry(KbAudioEntry {
            question_id: "q1".to_string(),
            segment_type: "question".to_string(),
            file_path: "p".to_string(),
            size_bytes: 100,
            duration_seconds: 1.5,
            sample_rate: 24000,
            created_at: Utc::now(),
            hint_index: 0,
        });
        assert_eq!(manifest.total_size_bytes, 100);
        assert!((manifest.total_duration_seconds - 1.5).abs() < 1e-9);
        assert!(manifest.segments.get("q1").unwrap().contains_key("question"));
    }
}

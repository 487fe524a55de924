//! Prefetch job progress tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a prefetch job.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed,
}

impl PrefetchStatus {
    /// Whether a job in this state is done running and eligible for cleanup.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Cancelled | Self::Failed
        )
    }
}

/// Progress snapshot for one topic prefetch job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PrefetchProgress {
    pub job_id: String,
    pub curriculum_id: String,
    pub topic_id: String,
    pub total_segments: usize,
    pub completed: usize,
    pub cached: usize,
    pub generated: usize,
    pub failed: usize,
    pub status: PrefetchStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PrefetchProgress {
    #[must_use]
    pub fn new(job_id: String, curriculum_id: String, topic_id: String, total_segments: usize) -> Self {
        Self {
            job_id,
            curriculum_id,
            topic_id,
            total_segments,
            completed: 0,
            cached: 0,
            generated: 0,
            failed: 0,
            status: PrefetchStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Percentage of segments completed, rounded to one decimal place. A
    /// zero-segment job is reported as fully complete.
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
    fn zero_segment_job_reports_fully_complete() {
        let p = PrefetchProgress::new("j1".into(), "c1".into(), "t1".into(), 0);
        assert_eq!(p.percent_complete(), 100.0);
    }

    #[test]
    fn percent_complete_tracks_progress() {
        let mut p = PrefetchProgress::new("j1".into(), "c1".into(), "t1".into(), 4);
        p.completed = 1;
        assert_eq!(p.percent_complete(), 25.0);
    }

    #[test]
    fn terminal_states_are_identified() {
        assert!(PrefetchStatus::Completed.is_terminal());
        assert!(PrefetchStatus::Cancelled.is_terminal());
        assert!(!PrefetchStatus::InProgress.is_terminal());
        assert!(!PrefetchStatus::Pending.is_terminal());
    }
}

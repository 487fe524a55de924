//! Request priority used by the TTS resource pool and every caller that
//! schedules synthesis work against it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{TtsCoreError, TtsCoreResult};

/// Scheduling priority for a TTS generation request.
///
/// Ordered numerically so a `Priority` can be compared directly: higher
/// values preempt the resource pool's semaphores first. The three levels
/// mirror the three call sites that generate audio: a user is waiting
/// (`Live`), the system is getting ahead of a user who will likely need this
/// soon (`Prefetch`), or a batch job is filling in coverage with no one
/// waiting (`Scheduled`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Background batch generation (knowledge-bowl pre-gen, comparison
    /// variants). No caller is blocked on this completing.
    Scheduled,
    /// Speculative prefetch ahead of a live session.
    Prefetch,
    /// A user is waiting on this request right now.
    Live,
}

impl Priority {
    /// Numeric weight used for ordering and for selecting which resource
    /// pool semaphore a request draws from.
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Scheduled => 1,
            Self::Prefetch => 5,
            Self::Live => 10,
        }
    }

    /// Whether this priority draws from the pool's live semaphore (as
    /// opposed to the shared background semaphore).
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }

    /// Parse from the lowercase names used in configuration and logs.
    pub fn parse(value: &str) -> TtsCoreResult<Self> {
        match value {
            "scheduled" => Ok(Self::Scheduled),
            "prefetch" => Ok(Self::Prefetch),
            "live" => Ok(Self::Live),
            other => Err(TtsCoreError::unknown_priority(other)),
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight().cmp(&other.weight())
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Prefetch => "prefetch",
            Self::Live => "live",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_weights() {
        assert!(Priority::Live > Priority::Prefetch);
        assert!(Priority::Prefetch > Priority::Scheduled);
    }

    #[test]
    fn weights_match_spec() {
        assert_eq!(Priority::Live.weight(), 10);
        assert_eq!(Priority::Prefetch.weight(), 5);
        assert_eq!(Priority::Scheduled.weight(), 1);
    }

    #[test]
    fn round_trips_through_parse_and_display() {
        for p in [Priority::Scheduled, Priority::Prefetch, Priority::Live] {
            assert_eq!(Priority::parse(&p.to_string()).unwrap(), p);
        }
    }

    #[test]
    fn rejects_unknown_priority() {
        assert!(Priority::parse("urgent").is_err());
    }
}

//! `SQLite` schema and repositories backing the pre-gen job engine,
//! profile manager, and comparison session manager.
//!
//! This crate owns persistence only: schema DDL, row (de)serialization,
//! and repository port traits plus their `SQLite` implementations. The
//! lifecycle rules that mutate these rows (retry/backoff, auto-pause,
//! default-profile invariants, variant generation) live in `tts-pregen`.

#![deny(unsafe_code)]

pub mod error;
pub mod models;
pub mod repositories;
pub mod setup;

pub use error::{DbError, DbResult};
pub use models::{
    ComparisonConfiguration, ComparisonRating, ComparisonSample, ComparisonSession, ComparisonSessionStatus,
    ComparisonVariant, ComparisonVariantStatus, Job, JobItem, JobItemStatus, JobStatus, JobType, ModuleProfileBinding,
    NewJobItem, NewProfile, Profile, ProfileExport, TtsConfig, VoiceSettings,
};
pub use repositories::{
    ComparisonRepository, JobRepository, NewComparisonSession, NewJob, ProfileRepository, SqliteComparisonRepository,
    SqliteJobRepository, SqliteProfileRepository,
};
pub use setup::setup_database;

#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;

//! Priority-aware TTS resource pool: bounds concurrent upstream requests so
//! background batch work can never starve a live user.

#![deny(unsafe_code)]

pub mod error;
pub mod pool;
pub mod synthesizer;

pub use error::{PoolError, PoolResult};
pub use pool::{PoolStats, TtsResourcePool, DEFAULT_MAX_CONCURRENT_BACKGROUND, DEFAULT_MAX_CONCURRENT_LIVE};
pub use synthesizer::{
    estimate_wav_duration_seconds, ChatterboxConfig, GenerationResult, HttpTtsSynthesizer,
    SynthesisRequest, TtsSynthesizer,
};

//! Priority-aware concurrency-limited dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tts_core::Priority;

use crate::error::PoolResult;
use crate::synthesizer::{GenerationResult, SynthesisRequest, TtsSynthesizer};

/// Default maximum concurrent `Live` requests.
pub const DEFAULT_MAX_CONCURRENT_LIVE: usize = 7;
/// Default maximum concurrent background (`Prefetch`/`Scheduled`) requests.
pub const DEFAULT_MAX_CONCURRENT_BACKGROUND: usize = 3;

/// Manages TTS generation with priority and concurrency limits.
///
/// Live requests and background requests (prefetch + scheduled) draw from
/// two independent semaphores so a burst of batch pre-generation work can
/// never starve a user who is waiting on a live response.
pub struct TtsResourcePool {
    synthesizer: Arc<dyn TtsSynthesizer>,
    live_semaphore: Semaphore,
    background_semaphore: Semaphore,
    max_concurrent_live: usize,
    max_concurrent_background: usize,
    live_requests: AtomicU64,
    background_requests: AtomicU64,
    live_in_flight: AtomicU64,
    background_in_flight: AtomicU64,
    errors: AtomicU64,
}

impl TtsResourcePool {
    /// Build a pool backed by `synthesizer`, with the given concurrency
    /// caps for live and background requests.
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn TtsSynthesizer>,
        max_concurrent_live: usize,
        max_concurrent_background: usize,
    ) -> Self {
        Self {
            synthesizer,
            live_semaphore: Semaphore::new(max_concurrent_live),
            background_semaphore: Semaphore::new(max_concurrent_background),
            max_concurrent_live,
            max_concurrent_background,
            live_requests: AtomicU64::new(0),
            background_requests: AtomicU64::new(0),
            live_in_flight: AtomicU64::new(0),
            background_in_flight: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Build a pool with the default concurrency caps (7 live, 3 background).
    #[must_use]
    pub fn with_defaults(synthesizer: Arc<dyn TtsSynthesizer>) -> Self {
        Self::new(synthesizer, DEFAULT_MAX_CONCURRENT_LIVE, DEFAULT_MAX_CONCURRENT_BACKGROUND)
    }

    /// Generate audio for `request`, blocking on the semaphore for
    /// `priority`'s class until a slot is free.
    pub async fn generate_with_priority(
        &self,
        request: SynthesisRequest,
        priority: Priority,
    ) -> PoolResult<GenerationResult> {
        let is_live = priority.is_live();
        let semaphore = if is_live { &self.live_semaphore } else { &self.background_semaphore };

        let _permit = semaphore.acquire().await.expect("semaphore never closed");

        if is_live {
            self.live_in_flight.fetch_add(1, Ordering::Relaxed);
            self.live_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.background_in_flight.fetch_add(1, Ordering::Relaxed);
            self.background_requests.fetch_add(1, Ordering::Relaxed);
        }

        let result = self.synthesizer.synthesize(&request).await;

        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if is_live {
            self.live_in_flight.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.background_in_flight.fetch_sub(1, Ordering::Relaxed);
        }

        result
    }

    /// Snapshot current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let live_in_flight = self.live_in_flight.load(Ordering::Relaxed);
        let background_in_flight = self.background_in_flight.load(Ordering::Relaxed);
        PoolStats {
            live_requests: self.live_requests.load(Ordering::Relaxed),
            background_requests: self.background_requests.load(Ordering::Relaxed),
            live_in_flight,
            background_in_flight,
            live_available: self.max_concurrent_live as u64 - live_in_flight,
            background_available: self.max_concurrent_background as u64 - background_in_flight,
            errors: self.errors.load(Ordering::Relaxed),
            max_concurrent_live: self.max_concurrent_live as u64,
            max_concurrent_background: self.max_concurrent_background as u64,
        }
    }
}

/// Serializable snapshot of [`TtsResourcePool`] counters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStats {
    pub live_requests: u64,
    pub background_requests: u64,
    pub live_in_flight: u64,
    pub background_in_flight: u64,
    pub live_available: u64,
    pub background_available: u64,
    pub errors: u64,
    pub max_concurrent_live: u64,
    pub max_concurrent_background: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tts_core::Provider;

    struct CountingSynthesizer {
        in_flight: AtomicUsize,
        max_observed: AtomicUsize,
        delay: Duration,
    }

    impl CountingSynthesizer {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_observed: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl TtsSynthesizer for CountingSynthesizer {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(GenerationResult { audio_data: vec![], sample_rate: 24000, duration_seconds: 0.0 })
        }
    }

    struct FailingSynthesizer;

    #[async_trait]
    impl TtsSynthesizer for FailingSynthesizer {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            Err(PoolError::connection("boom"))
        }
    }

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            text: "hello".to_string(),
            voice_id: "v1".to_string(),
            provider: Provider::Piper,
            speed: 1.0,
            chatterbox_config: None,
        }
    }

    #[tokio::test]
    async fn never_exceeds_live_concurrency_cap() {
        let synth = Arc::new(CountingSynthesizer::new(Duration::from_millis(30)));
        let pool = Arc::new(TtsResourcePool::new(synth.clone(), 2, 1));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.generate_with_priority(request(), Priority::Live).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(synth.max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn background_requests_use_separate_cap_from_live() {
        let synth = Arc::new(CountingSynthesizer::new(Duration::from_millis(20)));
        let pool = TtsResourcePool::new(synth, 7, 3);

        let live = pool.generate_with_priority(request(), Priority::Live);
        let prefetch = pool.generate_with_priority(request(), Priority::Prefetch);
        let (a, b) = tokio::join!(live, prefetch);
        a.unwrap();
        b.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.live_requests, 1);
        assert_eq!(stats.background_requests, 1);
    }

    #[tokio::test]
    async fn errors_are_counted_and_in_flight_is_released() {
        let pool = TtsResourcePool::new(Arc::new(FailingSynthesizer), 7, 3);
        let result = pool.generate_with_priority(request(), Priority::Live).await;
        assert!(result.is_err());
        let stats = pool.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.live_in_flight, 0);
    }

    #[tokio::test]
    async fn scheduled_and_prefetch_share_the_background_semaphore() {
        let synth = Arc::new(CountingSynthesizer::new(Duration::from_millis(30)));
        let pool = Arc::new(TtsResourcePool::new(synth.clone(), 7, 1));

        let mut handles = Vec::new();
        for priority in [Priority::Prefetch, Priority::Scheduled, Priority::Prefetch] {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.generate_with_priority(request(), priority).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(synth.max_observed.load(Ordering::SeqCst) <= 1);
    }
}

//! The upstream HTTP seam: a port trait plus a default `reqwest`-backed
//! implementation, so the resource pool's concurrency policy can be tested
//! against a fake synthesizer without making network calls.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tts_core::Provider;

use crate::error::{PoolError, PoolResult};

/// Chatterbox-specific tuning knobs, forwarded to the upstream payload only
/// when the provider is chatterbox.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatterboxConfig {
    pub exaggeration: Option<f64>,
    pub cfg_weight: Option<f64>,
    pub language: Option<String>,
}

/// One synthesis request bound for an upstream provider.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub provider: Provider,
    pub speed: f64,
    pub chatterbox_config: Option<ChatterboxConfig>,
}

/// The audio bytes and metadata an upstream TTS server returned.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationResult {
    pub audio_data: Vec<u8>,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

/// Port trait for calling an upstream TTS provider. Implemented by
/// [`HttpTtsSynthesizer`] for production use and by a test double wherever
/// the pool's scheduling behavior is exercised without a network.
#[async_trait]
pub trait TtsSynthesizer: Send + Sync {
    /// Synthesize `request` against its provider's upstream server.
    async fn synthesize(&self, request: &SynthesisRequest) -> PoolResult<GenerationResult>;
}

/// WAV-header size assumed when estimating duration from a synthesized
/// file's byte size: a standard 44-byte RIFF/WAVE header followed by raw
/// 16-bit mono PCM samples. This estimate is only correct for that exact
/// format; a provider returning stereo, float, or a different header size
/// will produce a wrong duration.
const WAV_HEADER_BYTES: usize = 44;

/// Estimate a WAV file's duration in seconds assuming 16-bit mono PCM and
/// a 44-byte header, per the restriction documented on [`WAV_HEADER_BYTES`].
#[must_use]
pub fn estimate_wav_duration_seconds(audio_data: &[u8], sample_rate: u32) -> f64 {
    let data_size = audio_data.len().saturating_sub(WAV_HEADER_BYTES);
    let samples = data_size / 2;
    samples as f64 / f64::from(sample_rate)
}

/// Default `reqwest`-backed synthesizer calling OpenAI-compatible
/// `/v1/audio/speech` endpoints, one per provider.
pub struct HttpTtsSynthesizer {
    client: reqwest::Client,
    servers: HashMap<Provider, String>,
    sample_rates: HashMap<Provider, u32>,
}

impl HttpTtsSynthesizer {
    /// Build a synthesizer with the default local-development server URLs
    /// and per-provider sample rates.
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        let mut servers = HashMap::new();
        servers.insert(Provider::Vibevoice, "http://localhost:8880/v1/audio/speech".to_string());
        servers.insert(Provider::Piper, "http://localhost:11402/v1/audio/speech".to_string());
        servers.insert(Provider::Chatterbox, "http://localhost:8004/v1/audio/speech".to_string());

        let mut sample_rates = HashMap::new();
        for p in [Provider::Vibevoice, Provider::Piper, Provider::Chatterbox] {
            sample_rates.insert(p, p.default_sample_rate());
        }

        Self { client, servers, sample_rates }
    }

    /// Override the server URL and sample rate for a provider.
    pub fn configure_server(&mut self, provider: Provider, url: impl Into<String>, sample_rate: u32) {
        let url = url.into();
        tracing::info!(provider = %provider, url = %url, sample_rate, "configured TTS server");
        self.servers.insert(provider, url);
        self.sample_rates.insert(provider, sample_rate);
    }
}

impl Default for HttpTtsSynthesizer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[derive(Serialize)]
struct SpeechPayload {
    model: &'static str,
    input: String,
    voice: String,
    response_format: &'static str,
    speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exaggeration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cfg_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
}

#[async_trait]
impl TtsSynthesizer for HttpTtsSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> PoolResult<GenerationResult> {
        let url = self
            .servers
            .get(&request.provider)
            .ok_or_else(|| PoolError::unconfigured_provider(request.provider.id()))?;
        let sample_rate = *self
            .sample_rates
            .get(&request.provider)
            .unwrap_or(&request.provider.default_sample_rate());

        let cfg = request.chatterbox_config.as_ref().filter(|_| request.provider.supports_chatterbox_fields());
        let payload = SpeechPayload {
            model: "tts-1",
            input: request.text.clone(),
            voice: request.voice_id.clone(),
            response_format: "wav",
            speed: request.speed,
            exaggeration: cfg.and_then(|c| c.exaggeration),
            cfg_weight: cfg.and_then(|c| c.cfg_weight),
            language: cfg.and_then(|c| c.language.clone()),
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PoolError::connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "TTS request failed");
            return Err(PoolError::upstream_status(status.as_u16(), body));
        }

        let audio_data = response.bytes().await.map_err(|e| PoolError::connection(e.to_string()))?.to_vec();
        let duration_seconds = estimate_wav_duration_seconds(&audio_data, sample_rate);

        Ok(GenerationResult { audio_data, sample_rate, duration_seconds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_duration_matches_known_sample() {
        // 44-byte header + 2 seconds of 16-bit mono audio at 24000 Hz.
        let samples = 24000 * 2;
        let audio = vec![0u8; WAV_HEADER_BYTES + samples * 2];
        let duration = estimate_wav_duration_seconds(&audio, 24000);
        assert!((duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn wav_duration_on_header_only_is_zero() {
        let audio = vec![0u8; WAV_HEADER_BYTES];
        assert_eq!(estimate_wav_duration_seconds(&audio, 24000), 0.0);
    }
}

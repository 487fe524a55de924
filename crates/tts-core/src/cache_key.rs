//! Deterministic cache key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::{TtsCoreError, TtsCoreResult};
use crate::provider::Provider;

/// Normalize text the same way for every caller so that two requests for
/// the same spoken content always land on the same cache key: trim leading
/// and trailing whitespace, apply Unicode NFC normalization, and collapse
/// interior runs of whitespace to a single space. Case is preserved.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    nfc.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First 16 hex characters of the SHA-256 digest of `input`.
#[must_use]
pub fn truncated_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let full = format!("{digest:x}");
    full[..16].to_string()
}

/// Hash of the normalized text alone, used to key knowledge-bowl segment
/// filenames independently of voice/provider (`item.text_hash[:8]` in the
/// original batch job naming scheme).
#[must_use]
pub fn hash_text(text: &str) -> String {
    truncated_sha256(&normalize_text(text))
}

/// Deterministic, value-equal key identifying one piece of synthesized
/// audio. Two requests that would produce acoustically identical audio
/// (same normalized text, voice, provider, and provider-affecting settings)
/// always hash to the same key, including across different users — the
/// cache is shared, not per-user.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CacheKey {
    text_hash: String,
    voice_id: String,
    provider: Provider,
    speed_millis: i64,
    exaggeration_millis: Option<i64>,
    cfg_weight_millis: Option<i64>,
    language: Option<String>,
}

impl CacheKey {
    /// Build a key from a raw synthesis request. `speed` is rounded to two
    /// decimal places before hashing so that floating-point jitter (e.g.
    /// `1.0000001` vs `1.0`) never produces distinct cache entries.
    /// `exaggeration`, `cfg_weight`, and `language` are only meaningful for
    /// the chatterbox provider; for any other provider they are forced
    /// unset before hashing regardless of what the caller passed in, so
    /// that two requests which would produce acoustically identical audio
    /// always collide on the same key. Rejecting the mismatch here instead
    /// would make the cache caller-dependent on trivia the provider ignores.
    pub fn from_request(
        text: &str,
        voice_id: impl Into<String>,
        provider: Provider,
        speed: f64,
        exaggeration: Option<f64>,
        cfg_weight: Option<f64>,
        language: Option<String>,
    ) -> TtsCoreResult<Self> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Err(TtsCoreError::EmptyText);
        }
        let (exaggeration, cfg_weight, language) = if provider.supports_chatterbox_fields() {
            (exaggeration, cfg_weight, language)
        } else {
            (None, None, None)
        };
        Ok(Self {
            text_hash: hash_text(&normalized),
            voice_id: voice_id.into(),
            provider,
            speed_millis: round_to_millis(speed),
            exaggeration_millis: exaggeration.map(round_to_millis),
            cfg_weight_millis: cfg_weight.map(round_to_millis),
            language,
        })
    }

    /// The truncated SHA-256 of the normalized source text.
    #[must_use]
    pub fn text_hash(&self) -> &str {
        &self.text_hash
    }

    /// The voice identifier this key was derived for.
    #[must_use]
    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    /// The provider this key was derived for.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    /// Speed, rounded to two decimal places, as originally supplied.
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.speed_millis as f64 / 100.0
    }

    /// The final cache key hash: first 16 hex chars of the SHA-256 of the
    /// canonical pipe-delimited field string. This is what callers use as
    /// the cache bucket/filename stem.
    #[must_use]
    pub fn hash(&self) -> String {
        truncated_sha256(&self.canonical_string())
    }

    fn canonical_string(&self) -> String {
        let mut parts = vec![
            self.text_hash.clone(),
            self.voice_id.clone(),
            self.provider.id().to_string(),
            format!("{:.2}", self.speed()),
        ];
        if let Some(e) = self.exaggeration_millis {
            parts.push(format!("{:.2}", e as f64 / 100.0));
        }
        if let Some(c) = self.cfg_weight_millis {
            parts.push(format!("{:.2}", c as f64 / 100.0));
        }
        if let Some(lang) = &self.language {
            parts.push(lang.clone());
        }
        parts.join("|")
    }
}

fn round_to_millis(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

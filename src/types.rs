use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A translation request as handed to the node by the routing layer.
///
/// `context` narrows terminology handling ("cardiology", "general", ...);
/// absent means "general".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl TranslationRequest {
    pub fn new(text: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    pub fn context_or_default(&self) -> &str {
        self.context.as_deref().unwrap_or("general")
    }
}

/// An inference output: translated text plus model confidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Translation {
    pub text: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Translation {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            model_version: None,
        }
    }
}

/// Where a served translation came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Inference,
}

/// A translation response as returned to the routing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub translation: Translation,
    pub source: ResponseSource,
    pub processing_ms: u64,
}

/// Distinguishes text from audio-derived results; audio results age out of
/// the cache much faster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ResultKind {
    Text,
    Audio,
}

/// Best-effort classification of why the link to the central service is bad.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Cause {
    Dns,
    WeakSignal,
    Congestion,
    Interference,
    BandwidthLimit,
    Intermittent,
    ScheduledOutage,
    Unknown,
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Cause::Dns => "dns",
            Cause::WeakSignal => "weak-signal",
            Cause::Congestion => "congestion",
            Cause::Interference => "interference",
            Cause::BandwidthLimit => "bandwidth-limit",
            Cause::Intermittent => "intermittent",
            Cause::ScheduledOutage => "scheduled-outage",
            Cause::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Canonical translation the central service hands back when its copy
/// supersedes the local one. Applying it is the only way a cache entry gets
/// overwritten from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTranslation {
    pub fingerprint: String,
    pub translation: Translation,
    pub kind: ResultKind,
}

/// A newer inference-model version announced by the central service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelUpdate {
    pub language_pair: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub announced_at: DateTime<Utc>,
}

/// Canonical artifacts riding along with a delivery acknowledgment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<CanonicalTranslation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelUpdate>,
}

impl CanonicalUpdate {
    pub fn is_empty(&self) -> bool {
        self.translation.is_none() && self.model.is_none()
    }
}

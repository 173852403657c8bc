use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// One image handed to the engine.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct DecisionImage {
    pub mime_type: String,
    #[serde(serialize_with = "as_base64")]
    pub data: Vec<u8>,
}

impl DecisionImage {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    #[must_use]
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl std::fmt::Debug for DecisionImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionImage")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn as_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

/// When the liveness prompt was shown and when speech started and ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessTimings {
    pub prompt_shown: Option<DateTime<Utc>>,
    pub speech_start: Option<DateTime<Utc>>,
    pub speech_end: Option<DateTime<Utc>>,
}

impl LivenessTimings {
    /// Read timings stored in session metadata under `liveness_timings`.
    ///
    /// Missing or malformed entries are treated as absent.
    #[must_use]
    pub fn from_metadata(metadata: &Map<String, Value>) -> Self {
        metadata
            .get("liveness_timings")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Fill every unset timing from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            prompt_shown: self.prompt_shown.or(fallback.prompt_shown),
            speech_start: self.speech_start.or(fallback.speech_start),
            speech_end: self.speech_end.or(fallback.speech_end),
        }
    }
}

/// Curated evidence for one verification.
///
/// Image names are `doc_front`, `doc_back` (optional), `selfie`, then
/// `keyframe_0..n` in time order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionRequest {
    pub images: BTreeMap<String, DecisionImage>,
    pub transcript: String,
    pub expected_phrase: String,
    pub timings: LivenessTimings,
}

impl DecisionRequest {
    /// Images in presentation order: document, selfie, then keyframes by index.
    #[must_use]
    pub fn ordered_images(&self) -> Vec<(&str, &DecisionImage)> {
        let rank = |name: &str| -> (u8, usize) {
            match name {
                "doc_front" => (0, 0),
                "doc_back" => (1, 0),
                "selfie" => (2, 0),
                other => match other.strip_prefix("keyframe_").and_then(|n| n.parse().ok()) {
                    Some(index) => (3, index),
                    None => (4, 0),
                },
            }
        };
        let mut images: Vec<_> = self
            .images
            .iter()
            .map(|(name, image)| (name.as_str(), image))
            .collect();
        images.sort_by_key(|(name, _)| (rank(name), *name));
        images
    }
}

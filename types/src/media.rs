//! Media kinds, their mime whitelists and on-disk extensions.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArtifactId, EnumParseError, SessionId};

/// Semantic kind of an uploaded media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    DocFront,
    DocBack,
    Selfie,
    PhraseAudio,
    AvClip,
}

const KIND_VALUES: &[&str] = &["doc_front", "doc_back", "selfie", "phrase_audio", "av_clip"];

/// Kinds that must be present before a session can be marked complete.
pub const REQUIRED_KINDS: [MediaKind; 3] = [MediaKind::DocFront, MediaKind::Selfie, MediaKind::AvClip];

const IMAGE_MIME_TYPES: &[&str] = &["image/jpeg", "image/png"];
const VIDEO_MIME_TYPES: &[&str] = &["video/mp4"];
const AUDIO_MIME_TYPES: &[&str] = &["audio/wav", "audio/wave"];

impl MediaKind {
    pub const ALL: [MediaKind; 5] = [
        MediaKind::DocFront,
        MediaKind::DocBack,
        MediaKind::Selfie,
        MediaKind::PhraseAudio,
        MediaKind::AvClip,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocFront => "doc_front",
            Self::DocBack => "doc_back",
            Self::Selfie => "selfie",
            Self::PhraseAudio => "phrase_audio",
            Self::AvClip => "av_clip",
        }
    }

    #[must_use]
    pub const fn allowed_mime_types(self) -> &'static [&'static str] {
        match self {
            Self::DocFront | Self::DocBack | Self::Selfie => IMAGE_MIME_TYPES,
            Self::AvClip => VIDEO_MIME_TYPES,
            Self::PhraseAudio => AUDIO_MIME_TYPES,
        }
    }

    /// Whether `mime_type` is on this kind's whitelist.
    ///
    /// Parameters (`; charset=...`) and case are ignored.
    #[must_use]
    pub fn accepts_mime(self, mime_type: &str) -> bool {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.allowed_mime_types().contains(&essence.as_str())
    }

    /// Fixed file extension for the raw upload, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::DocFront | Self::DocBack | Self::Selfie => "jpg",
            Self::AvClip => "mp4",
            Self::PhraseAudio => "wav",
        }
    }

    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.{}", self.as_str(), self.extension())
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doc_front" => Ok(Self::DocFront),
            "doc_back" => Ok(Self::DocBack),
            "selfie" => Ok(Self::Selfie),
            "phrase_audio" => Ok(Self::PhraseAudio),
            "av_clip" => Ok(Self::AvClip),
            _ => Err(EnumParseError::new("media kind", s, KIND_VALUES)),
        }
    }
}

/// Required kinds absent from `present`.
#[must_use]
pub fn missing_required_kinds<'a>(
    present: impl IntoIterator<Item = &'a MediaKind>,
) -> BTreeSet<MediaKind> {
    let present: BTreeSet<MediaKind> = present.into_iter().copied().collect();
    REQUIRED_KINDS
        .iter()
        .filter(|kind| !present.contains(*kind))
        .copied()
        .collect()
}

/// One uploaded raw media file bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub id: ArtifactId,
    pub session_id: SessionId,
    pub kind: MediaKind,
    pub locator: PathBuf,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

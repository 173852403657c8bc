use std::collections::BTreeSet;

use thiserror::Error;

use crate::{MediaKind, SessionStatus};

/// Error taxonomy shared by every Vouch operation.
///
/// Validation variants carry detail meant for the caller. `MediaProcessing`,
/// `MalformedDecision`, `DecisionUnavailable` and `Storage` carry internal
/// context that is logged but never echoed to clients.
#[derive(Debug, Error)]
pub enum VouchError {
    #[error("session not found")]
    NotFound,

    #[error("cannot {operation} a session in status {status}")]
    InvalidState {
        status: SessionStatus,
        operation: &'static str,
    },

    #[error("unknown media kind '{0}'")]
    UnknownKind(String),

    #[error("mime type '{mime_type}' is not accepted for {kind}")]
    UnsupportedMedia { kind: MediaKind, mime_type: String },

    #[error("missing required media: {}", format_kinds(missing))]
    IncompleteMedia { missing: BTreeSet<MediaKind> },

    #[error("media processing failed: {0}")]
    MediaProcessing(String),

    #[error("malformed decision: {0}")]
    MalformedDecision(String),

    #[error("decision engine unavailable: {0}")]
    DecisionUnavailable(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub type VouchResult<T> = Result<T, VouchError>;

fn format_kinds(kinds: &BTreeSet<MediaKind>) -> String {
    kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl VouchError {
    /// Stable machine-readable code for the transport surface.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::UnknownKind(_) => "unknown_kind",
            Self::UnsupportedMedia { .. } => "unsupported_media",
            Self::IncompleteMedia { .. } => "incomplete_media",
            Self::MediaProcessing(_) => "media_processing",
            Self::MalformedDecision(_) => "malformed_decision",
            Self::DecisionUnavailable(_) => "decision_unavailable",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether the message may be shown to a caller verbatim.
    #[must_use]
    pub const fn is_client_visible(&self) -> bool {
        matches!(
            self,
            Self::NotFound
                | Self::InvalidState { .. }
                | Self::UnknownKind(_)
                | Self::UnsupportedMedia { .. }
                | Self::IncompleteMedia { .. }
        )
    }

    /// Message safe to return to a caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.is_client_visible() {
            return self.to_string();
        }
        match self {
            Self::MediaProcessing(_) => "uploaded media could not be processed".to_string(),
            Self::MalformedDecision(_) | Self::DecisionUnavailable(_) => {
                "verification service failed; try again later".to_string()
            }
            _ => "internal error".to_string(),
        }
    }

    pub fn invalid_state(status: SessionStatus, operation: &'static str) -> Self {
        Self::InvalidState { status, operation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_media_lists_missing_kinds() {
        let err = VouchError::IncompleteMedia {
            missing: BTreeSet::from([MediaKind::AvClip, MediaKind::Selfie]),
        };
        assert_eq!(err.to_string(), "missing required media: selfie, av_clip");
        assert_eq!(err.code(), "incomplete_media");
    }

    #[test]
    fn internal_detail_is_not_public() {
        let err = VouchError::Storage("disk I/O error at /var/lib/vouch".into());
        assert!(!err.public_message().contains("/var/lib"));

        let err = VouchError::MalformedDecision("missing field `overall`".into());
        assert!(!err.public_message().contains("overall"));
    }

    #[test]
    fn validation_detail_is_public() {
        let err = VouchError::invalid_state(SessionStatus::Verified, "upload to");
        assert_eq!(
            err.public_message(),
            "cannot upload to a session in status verified"
        );
    }
}

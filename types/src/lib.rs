//! Core domain types for Vouch.
//!
//! Pure domain types with no IO and no async. Everything here can be used from
//! any layer: the store, the media pipeline, the decision client and the HTTP
//! surface all speak these types.

#![allow(clippy::missing_errors_doc)]

mod error;
mod ids;
mod media;
mod session;
mod verdict;

use thiserror::Error;

pub use error::{VouchError, VouchResult};
pub use ids::{ArtifactId, ResultId, SessionId};
pub use media::{MediaArtifact, MediaKind, REQUIRED_KINDS, missing_required_kinds};
pub use session::{Session, SessionStatus};
pub use verdict::{DecisionStatus, Score, ScoreRangeError, VerificationResult, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} value '{raw}'; expected one of: {expected:?}")]
pub struct EnumParseError {
    kind: &'static str,
    raw: String,
    expected: &'static [&'static str],
}

impl EnumParseError {
    #[must_use]
    pub fn new(kind: &'static str, raw: impl Into<String>, expected: &'static [&'static str]) -> Self {
        Self {
            kind,
            raw: raw.into(),
            expected,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub const fn expected(&self) -> &'static [&'static str] {
        self.expected
    }
}

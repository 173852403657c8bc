//! Session lifecycle status and the transition rules between states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{EnumParseError, SessionId};

/// Lifecycle status of a verification session.
///
/// ```text
/// created -> uploading -> media_complete -> verified
///                                       \-> rejected
/// ```
///
/// `verified` and `rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Uploading,
    MediaComplete,
    Verified,
    Rejected,
}

const STATUS_VALUES: &[&str] = &[
    "created",
    "uploading",
    "media_complete",
    "verified",
    "rejected",
];

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Uploading => "uploading",
            Self::MediaComplete => "media_complete",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Rejected)
    }

    /// Uploads are accepted until the caller declares the media complete.
    #[must_use]
    pub const fn accepts_uploads(self) -> bool {
        matches!(self, Self::Created | Self::Uploading)
    }

    /// Whether a write may move a session from `self` to `next`.
    ///
    /// Staying put is allowed for the non-terminal states so repeated uploads
    /// and repeated completion calls are idempotent.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Created => false,
            Self::Uploading => matches!(self, Self::Created | Self::Uploading),
            Self::MediaComplete => matches!(self, Self::Uploading | Self::MediaComplete),
            Self::Verified | Self::Rejected => matches!(self, Self::MediaComplete),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "uploading" => Ok(Self::Uploading),
            "media_complete" => Ok(Self::MediaComplete),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            _ => Err(EnumParseError::new("session status", s, STATUS_VALUES)),
        }
    }
}

/// One end-to-end verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub callback_url: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

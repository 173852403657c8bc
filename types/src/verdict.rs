//! Decision outcomes: the parsed verdict and its persisted form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{EnumParseError, ResultId, SessionId, SessionStatus};

/// Overall status reported by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Verified,
    Review,
    Rejected,
}

const DECISION_VALUES: &[&str] = &["verified", "review", "rejected"];

impl DecisionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Review => "review",
            Self::Rejected => "rejected",
        }
    }

    /// Session status a committed decision moves the session into.
    ///
    /// Only an outright `verified` verifies the session; `review` is treated
    /// as a rejection.
    #[must_use]
    pub const fn session_status(self) -> SessionStatus {
        match self {
            Self::Verified => SessionStatus::Verified,
            Self::Review | Self::Rejected => SessionStatus::Rejected,
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verified" => Ok(Self::Verified),
            "review" => Ok(Self::Review),
            "rejected" => Ok(Self::Rejected),
            _ => Err(EnumParseError::new("decision status", s, DECISION_VALUES)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("score {0} is outside [0, 1]")]
pub struct ScoreRangeError(pub f64);

/// A probability-like score guaranteed to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub fn new(value: f64) -> Result<Self, ScoreRangeError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ScoreRangeError(value))
        }
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Score {
    type Error = ScoreRangeError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// A validated decision that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: DecisionStatus,
    pub score: Score,
    pub ocr_data: Map<String, Value>,
    pub face_match: Score,
    pub liveness: Score,
    pub av_sync: Score,
    pub audio_spoof: Score,
    pub explanations: Vec<String>,
}

/// Immutable, persisted outcome of a verification. At most one per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub id: ResultId,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

impl VerificationResult {
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.verdict.status.session_status()
    }
}

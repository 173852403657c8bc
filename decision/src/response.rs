use serde::Deserialize;
use serde_json::{Map, Value};
use vouch_types::{DecisionStatus, Score, Verdict};

use crate::DecisionError;

#[derive(Debug, Deserialize)]
struct RawDecision {
    overall: RawOverall,
    ocr: Map<String, Value>,
    face_match: f64,
    liveness_active: RawScored,
    av_sync: f64,
    audio_spoof_guess: f64,
    explanations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawOverall {
    status: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct RawScored {
    score: f64,
}

/// Remove a surrounding Markdown code fence (```` ```json ```` or bare ```` ``` ````).
///
/// Text without a leading fence is returned trimmed but otherwise unchanged.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") up to the first newline.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse an engine's textual answer, fenced or raw, into a validated verdict.
pub fn parse_decision(text: &str) -> Result<Verdict, DecisionError> {
    let json = strip_code_fence(text);
    let value: Value = serde_json::from_str(json)
        .map_err(|e| DecisionError::Malformed(format!("response is not JSON: {e}")))?;
    verdict_from_value(value)
}

/// Validate an already-structured response.
pub fn verdict_from_value(value: Value) -> Result<Verdict, DecisionError> {
    let raw: RawDecision = serde_json::from_value(value)
        .map_err(|e| DecisionError::Malformed(format!("unexpected response shape: {e}")))?;

    let status: DecisionStatus = raw
        .overall
        .status
        .parse()
        .map_err(|e| DecisionError::Malformed(format!("{e}")))?;
    let score = |field: &str, value: f64| {
        Score::new(value).map_err(|e| DecisionError::Malformed(format!("{field}: {e}")))
    };

    Ok(Verdict {
        status,
        score: score("overall.score", raw.overall.score)?,
        ocr_data: raw.ocr,
        face_match: score("face_match", raw.face_match)?,
        liveness: score("liveness_active.score", raw.liveness_active.score)?,
        av_sync: score("av_sync", raw.av_sync)?,
        audio_spoof: score("audio_spoof_guess", raw.audio_spoof_guess)?,
        explanations: raw.explanations,
    })
}

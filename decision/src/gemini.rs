//! Gemini `generateContent` engine.

use std::time::Duration;

use serde_json::{Value, json};
use vouch_types::{SessionId, Verdict};

use crate::retry::{RetryOutcome, RetryPolicy, send_with_retry};
use crate::{
    DecisionEngine, DecisionError, DecisionFut, DecisionRequest, PromptTemplates, http_client,
    parse_decision, read_capped_error_body,
};

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    /// API root, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    pub base_url: String,
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

pub struct GeminiDecisionEngine {
    client: reqwest::Client,
    settings: GeminiSettings,
    prompts: PromptTemplates,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GeminiDecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiDecisionEngine")
            .field("model", &self.settings.model)
            .field("base_url", &self.settings.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiDecisionEngine {
    pub fn new(settings: GeminiSettings, prompts: PromptTemplates) -> Result<Self, DecisionError> {
        let client = http_client(&settings.base_url, settings.timeout)
            .map_err(|e| DecisionError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            prompts,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        )
    }

    fn build_body(&self, session: SessionId, request: &DecisionRequest) -> Value {
        let timings = serde_json::to_string_pretty(&request.timings).unwrap_or_else(|_| "{}".into());
        let user_text = self.prompts.render_user(
            &session.to_string(),
            &request.transcript,
            &request.expected_phrase,
            &timings,
        );

        let mut parts = vec![json!({ "text": user_text })];
        for (name, image) in request.ordered_images() {
            parts.push(json!({ "text": format!("Image: {name}") }));
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": image.base64(),
                }
            }));
        }

        json!({
            "system_instruction": {
                "parts": [{ "text": self.prompts.system }]
            },
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "maxOutputTokens": self.settings.max_output_tokens,
                "temperature": self.settings.temperature,
                "responseMimeType": "application/json",
            }
        })
    }

    async fn call(&self, session: SessionId, request: &DecisionRequest) -> Result<Verdict, DecisionError> {
        let url = self.endpoint();
        let body = self.build_body(session, request);
        tracing::debug!(%session, images = request.images.len(), model = %self.settings.model, "requesting decision");

        let outcome = send_with_retry(
            || {
                self.client
                    .post(&url)
                    .header("x-goog-api-key", self.settings.api_key.as_str())
                    .header("content-type", "application/json")
                    .json(&body)
            },
            &self.retry,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status();
                let detail = read_capped_error_body(response).await;
                tracing::warn!(%session, %status, body = %detail, "decision endpoint refused request");
                return Err(DecisionError::Unavailable(format!("HTTP {status}")));
            }
            RetryOutcome::Transport { attempts, source } => {
                tracing::warn!(%session, attempts, error = %source, "decision endpoint unreachable");
                return Err(DecisionError::Unavailable(format!(
                    "transport error after {attempts} attempt(s): {source}"
                )));
            }
        };

        let payload: Value = response
            .json()
            .await
            .map_err(|e| DecisionError::Unavailable(format!("reading response: {e}")))?;
        let text = candidate_text(&payload)?;
        parse_decision(&text)
    }
}

impl DecisionEngine for GeminiDecisionEngine {
    fn decide<'a>(&'a self, session: SessionId, request: &'a DecisionRequest) -> DecisionFut<'a> {
        Box::pin(self.call(session, request))
    }
}

/// Concatenated text parts of the first candidate.
fn candidate_text(payload: &Value) -> Result<String, DecisionError> {
    let candidate = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let reason = payload
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            DecisionError::Malformed(format!("empty response: {reason}"))
        })?;

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        return Err(DecisionError::Malformed(format!(
            "candidate has no text (finish reason {reason})"
        )));
    }
    Ok(text)
}

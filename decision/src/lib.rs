//! Decision engine contract for Vouch.
//!
//! The service hands a [`DecisionRequest`] of curated images and liveness
//! context to a [`DecisionEngine`] and gets back a validated [`Verdict`].
//! [`GeminiDecisionEngine`] is the production engine; responses from any
//! engine go through [`parse_decision`].

#![allow(clippy::missing_errors_doc)]

mod gemini;
mod prompt;
mod request;
mod response;
pub mod retry;

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;
use vouch_types::{SessionId, Verdict, VouchError};

pub use gemini::{GeminiDecisionEngine, GeminiSettings};
pub use prompt::PromptTemplates;
pub use request::{DecisionImage, DecisionRequest, LivenessTimings};
pub use response::{parse_decision, strip_code_fence, verdict_from_value};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum DecisionError {
    /// Transport failure, timeout, or a non-success HTTP status.
    #[error("decision engine unavailable: {0}")]
    Unavailable(String),

    /// The engine answered, but not with a valid decision.
    #[error("malformed decision: {0}")]
    Malformed(String),
}

impl From<DecisionError> for VouchError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::Unavailable(detail) => VouchError::DecisionUnavailable(detail),
            DecisionError::Malformed(detail) => VouchError::MalformedDecision(detail),
        }
    }
}

pub type DecisionFut<'a> = Pin<Box<dyn Future<Output = Result<Verdict, DecisionError>> + Send + 'a>>;

/// External reasoning collaborator that turns curated evidence into a verdict.
pub trait DecisionEngine: Send + Sync {
    fn decide<'a>(&'a self, session: SessionId, request: &'a DecisionRequest) -> DecisionFut<'a>;
}

/// Shared client for `https` endpoints. Plain-`http` base URLs (local mocks,
/// sidecars) get their own client with `https_only` off.
pub fn http_client(base_url: &str, timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    let https = base_url.starts_with("https://");
    base_client_builder(https).timeout(timeout).build()
}

fn base_client_builder(https_only: bool) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .https_only(https_only)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .user_agent(user_agent())
}

fn user_agent() -> &'static str {
    static AGENT: OnceLock<String> = OnceLock::new();
    AGENT.get_or_init(|| format!("vouch/{}", env!("CARGO_PKG_VERSION")))
}

/// Read at most 32 KiB of an error body for logging.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

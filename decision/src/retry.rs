//! Exponential-backoff retries for calls to the decision endpoint.
//!
//! Retryable: HTTP 408, 409, 429, 5xx, plus connect/timeout transport errors.
//! A server may force or forbid a retry with `x-should-retry`. Every attempt
//! carries the same `Idempotency-Key` and an `X-Retry-Count` of 0, 1, ...

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use uuid::Uuid;

const RETRY_AFTER_CEILING: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Down-jitter: each delay is scaled by a factor in `[1 - jitter, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `step + 1`. A valid `Retry-After` wins.
    #[must_use]
    pub fn delay(&self, step: u32, headers: Option<&HeaderMap>) -> Duration {
        if let Some(delay) = headers.and_then(parse_retry_after) {
            return delay;
        }
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(step.min(30) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let factor = 1.0 - rand::random::<f64>() * self.jitter;
        Duration::from_secs_f64(capped * factor)
    }
}

/// `Retry-After-Ms` (float milliseconds) or `Retry-After` (integer seconds),
/// accepted only when strictly between zero and one minute.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let in_range = |d: Duration| d > Duration::ZERO && d < RETRY_AFTER_CEILING;

    if let Some(ms) = header("retry-after-ms").and_then(|s| s.trim().parse::<f64>().ok())
        && ms.is_finite()
        && ms > 0.0
    {
        let delay = Duration::from_secs_f64(ms / 1000.0);
        if in_range(delay) {
            return Some(delay);
        }
    }
    header("retry-after")
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .filter(|d| in_range(*d))
}

#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    if let Some(flag) = headers.get("x-should-retry").and_then(|v| v.to_str().ok()) {
        if flag.eq_ignore_ascii_case("true") {
            return true;
        }
        if flag.eq_ignore_ascii_case("false") {
            return false;
        }
    }
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_retryable_transport(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

#[must_use]
pub fn idempotency_key() -> String {
    format!("vouch-{}", Uuid::new_v4())
}

/// Final result of a retried call.
#[derive(Debug)]
pub enum RetryOutcome {
    Success(Response),
    /// Non-2xx answer, either non-retryable or the last one seen.
    HttpError(Response),
    Transport { attempts: u32, source: reqwest::Error },
}

/// Send the request built by `build` until it succeeds, fails
/// non-retryably, or the policy runs out of retries.
pub async fn send_with_retry<F>(build: F, policy: &RetryPolicy) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let key = idempotency_key();
    let mut attempt = 0;
    loop {
        let last = attempt >= policy.max_retries;
        let request = build()
            .header("Idempotency-Key", key.as_str())
            .header("X-Retry-Count", attempt.to_string());

        let delay = match request.send().await {
            Ok(response) if response.status().is_success() => {
                return RetryOutcome::Success(response);
            }
            Ok(response) => {
                let status = response.status();
                if last || !should_retry(status, response.headers()) {
                    return RetryOutcome::HttpError(response);
                }
                let delay = policy.delay(attempt, Some(response.headers()));
                tracing::debug!(%status, attempt, delay_ms = delay.as_millis(), "retrying decision call");
                delay
            }
            Err(source) => {
                if last || !is_retryable_transport(&source) {
                    return RetryOutcome::Transport {
                        attempts: attempt + 1,
                        source,
                    };
                }
                let delay = policy.delay(attempt, None);
                tracing::debug!(error = %source, attempt, delay_ms = delay.as_millis(), "retrying decision call");
                delay
            }
        };
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn retry_after_prefers_milliseconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after-ms", HeaderValue::from_static("1500"));
        headers.insert("retry-after", HeaderValue::from_static("9"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn retry_after_out_of_range_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("0"));
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retryable_statuses() {
        let headers = HeaderMap::new();
        for status in [408, 409, 429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(status).unwrap();
            assert!(should_retry(status, &headers), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            let status = StatusCode::from_u16(status).unwrap();
            assert!(!should_retry(status, &headers), "{status}");
        }
    }

    #[test]
    fn server_override_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-should-retry", HeaderValue::from_static("TRUE"));
        assert!(should_retry(StatusCode::BAD_REQUEST, &headers));
        headers.insert("x-should-retry", HeaderValue::from_static("false"));
        assert!(!should_retry(StatusCode::SERVICE_UNAVAILABLE, &headers));
    }

    #[test]
    fn backoff_doubles_within_jitter_and_caps() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let first = policy.delay(0, None);
            assert!(first >= Duration::from_millis(375) && first <= Duration::from_millis(500));
            let second = policy.delay(1, None);
            assert!(second >= Duration::from_millis(750) && second <= Duration::from_millis(1000));
            assert!(policy.delay(10, None) <= Duration::from_secs(8));
        }
    }

    #[test]
    fn keys_are_unique() {
        assert_ne!(idempotency_key(), idempotency_key());
    }
}

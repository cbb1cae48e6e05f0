//! Remote gateway clients.
//!
//! Each client owns a [`reqwest::Client`], maps HTTP failures onto
//! [`ProviderError`](crate::errors::ProviderError), and retries
//! transport-class failures with exponential backoff. Authentication
//! failures are never retried; rate limits honor the server's `Retry-After`
//! hint when present.

pub mod imaging;
pub mod reasoning;
pub mod tracker;

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

use crate::errors::ProviderError;

pub(crate) const DEFAULT_ATTEMPTS: u32 = 3;
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Run `op` up to `attempts` times, sleeping between retriable failures.
pub(crate) async fn with_backoff<T, F, Fut>(
    provider: &'static str,
    attempts: u32,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && err.is_retriable() => {
                let wait = match &err {
                    ProviderError::RateLimit {
                        retry_after: Some(seconds),
                        ..
                    } => Duration::from_secs(*seconds),
                    _ => delay,
                };
                tracing::warn!(
                    provider,
                    attempt,
                    attempts,
                    wait_seconds = wait.as_secs(),
                    error = %err,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                tracing::error!(provider, attempt, error = %err, "provider call failed");
                return Err(err);
            }
        }
    }
}

/// Classify a non-success HTTP reply.
pub(crate) fn error_for_status(
    provider: &'static str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: String,
) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED => ProviderError::Auth { provider },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimit {
            provider,
            retry_after,
        },
        status => ProviderError::Api {
            provider,
            status: Some(status.as_u16()),
            message: truncate(&body, 500),
        },
    }
}

/// Map a reqwest failure onto the transport/timeout split.
pub(crate) fn transport_error(
    provider: &'static str,
    timeout_seconds: u64,
    err: reqwest::Error,
) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider,
            seconds: timeout_seconds,
        }
    } else {
        ProviderError::Transport {
            provider,
            message: err.to_string(),
        }
    }
}

pub(crate) fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

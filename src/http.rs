use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Fallback pause when a throttling response carries no usable delay
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Why a single request attempt did not succeed.
///
/// Never leaves the source or sink: both fold it into their own outcome.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("throttled by remote, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct ThrottleBody {
    retry_after: f64,
}

/// Pass successful responses through and classify everything else.
pub async fn check_response(response: Response) -> Result<Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RequestError::Throttled {
            retry_after: parse_retry_after(&headers, &body),
        });
    }

    Err(RequestError::Status { status, body })
}

/// Delay from a throttling response: JSON `retry_after` (float seconds) first,
/// then the `Retry-After` header, then a one second default.
pub fn parse_retry_after(headers: &HeaderMap, body: &str) -> Duration {
    if let Ok(parsed) = serde_json::from_str::<ThrottleBody>(body) {
        if let Some(delay) = seconds(parsed.retry_after) {
            return delay;
        }
    }

    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(seconds)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

fn seconds(value: f64) -> Option<Duration> {
    if value.is_finite() && value >= 0.0 {
        Some(Duration::from_secs_f64(value))
    } else {
        None
    }
}

//! Failure classification and backoff scheduling for the gateway's retry loop.

use super::sanitize::sanitize_api_error;
use super::{ErrorKind, TransportFailure};
use crate::config::RetryPolicy;
use std::time::Duration;

/// Body phrases that mean "rate limited" whatever the status code says.
const RATE_LIMIT_PHRASES: [&str; 3] = ["rate limit", "too many requests", "quota exceeded"];

/// Classify an HTTP reply. `None` means the attempt succeeded (2xx).
pub fn classify_response(status: u16, body: &str, policy: &RetryPolicy) -> Option<ErrorKind> {
    if (200..300).contains(&status) {
        return None;
    }

    if status == 429 {
        return Some(ErrorKind::RateLimit(format!(
            "HTTP {}: {}",
            status,
            sanitize_api_error(body)
        )));
    }

    // Some providers report quota exhaustion as a 400 or 403.
    let lower = body.to_lowercase();
    if RATE_LIMIT_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return Some(ErrorKind::RateLimit(format!(
            "rate limit detected in HTTP {} response: {}",
            status,
            sanitize_api_error(body)
        )));
    }

    if (500..600).contains(&status) && policy.retry_on_server_error {
        return Some(ErrorKind::ServerError(format!(
            "HTTP {}: {}",
            status,
            sanitize_api_error(body)
        )));
    }

    Some(ErrorKind::NonRetryable(format!(
        "HTTP {}: {}",
        status,
        sanitize_api_error(body)
    )))
}

/// Classify a failure that happened before any status was received.
pub fn classify_transport(failure: &TransportFailure, policy: &RetryPolicy) -> ErrorKind {
    match failure {
        TransportFailure::Timeout(msg) if policy.retry_on_timeout => {
            ErrorKind::Timeout(msg.clone())
        }
        // With timeout retries off a timeout is just another transport failure.
        TransportFailure::Timeout(msg) => ErrorKind::NetworkError(format!("request timed out: {msg}")),
        TransportFailure::InvalidRequest(msg)
        | TransportFailure::Connect(msg)
        | TransportFailure::Other(msg) => ErrorKind::NetworkError(msg.clone()),
    }
}

/// Un-jittered delay before retry `attempt` (0 = first retry):
/// `min(initial_delay * exponential_base^attempt, max_delay)`.
pub fn base_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if policy.initial_delay.is_zero() {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = policy.initial_delay.as_secs_f64() * policy.exponential_base.powi(exponent);
    let capped = secs.min(policy.max_delay.as_secs_f64());
    Duration::try_from_secs_f64(capped).unwrap_or(policy.max_delay)
}

/// Delay with jitter drawn from `[0, base * jitter_factor)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    jittered_delay(policy, attempt, rand::random::<f64>())
}

/// `base + base * jitter_factor * unit`, with `unit` in `[0, 1]`.
pub fn jittered_delay(policy: &RetryPolicy, attempt: u32, unit: f64) -> Duration {
    let base = base_delay(policy, attempt);
    if policy.jitter_factor <= 0.0 {
        return base;
    }
    base.saturating_add(base.mul_f64(policy.jitter_factor * unit.clamp(0.0, 1.0)))
}

pub mod breaker;
pub mod compatible;
pub mod normalize;
pub mod retry;
pub mod sanitize;

use async_trait::async_trait;
use std::time::Duration;

/// Classified outcome of a failed attempt (or of a whole call).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    #[error("Rate limit error: {0}")]
    RateLimit(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request failed: {0}")]
    NonRetryable(String),

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("{0}")]
    ExtractionFailure(String),

    #[error("Request failed after {attempts} attempts. Last error: {last}")]
    ExhaustedRetries { attempts: u32, last: Box<ErrorKind> },
}

impl ErrorKind {
    /// Rate limits, server errors, timeouts and network errors may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit(_)
                | ErrorKind::ServerError(_)
                | ErrorKind::Timeout(_)
                | ErrorKind::NetworkError(_)
        )
    }

    /// Short stable name, used as the `error_type` log field.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit(_) => "rate_limit",
            ErrorKind::ServerError(_) => "server_error",
            ErrorKind::Timeout(_) => "timeout",
            ErrorKind::NetworkError(_) => "network_error",
            ErrorKind::NonRetryable(_) => "non_retryable",
            ErrorKind::CircuitOpen(_) => "circuit_open",
            ErrorKind::ExtractionFailure(_) => "extraction_failure",
            ErrorKind::ExhaustedRetries { .. } => "exhausted_retries",
        }
    }
}

/// Terminal error of a `complete` call: the classified kind plus the number of
/// HTTP attempts actually made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} (attempts made: {attempts})")]
pub struct GatewayError {
    #[source]
    pub kind: ErrorKind,
    pub attempts: u32,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, attempts: u32) -> Self {
        Self { kind, attempts }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The underlying cause: the wrapped error for `ExhaustedRetries`, the kind itself otherwise.
    pub fn last_cause(&self) -> &ErrorKind {
        match &self.kind {
            ErrorKind::ExhaustedRetries { last, .. } => last,
            other => other,
        }
    }
}

/// A failed attempt: its classification plus the provider's response body,
/// when one arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub kind: ErrorKind,
    /// Secret-scrubbed body of a non-2xx reply.
    pub response_text: Option<String>,
}

impl From<ErrorKind> for AttemptFailure {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            response_text: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Raw HTTP reply, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Failure before an HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    /// The request could not be built (bad header, bad URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

/// One POST of a JSON body. Implementations make exactly one attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportFailure>;
}

use crate::config::{ConfigError, GatewayConfig, RetryPolicy};
use crate::providers::breaker::CircuitBreaker;
use crate::providers::compatible::{HttpTransport, RequestBuilder};
use crate::providers::normalize::extract_content;
use crate::providers::retry::backoff_delay;
use crate::providers::{AttemptFailure, ErrorKind, GatewayError, Transport};
use crate::types::{ChatRequest, ChatResponse, CircuitState};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Resilient client for one OpenAI-compatible chat-completion endpoint.
///
/// Each `complete` call gates every attempt on the circuit breaker, retries
/// retryable failures with jittered exponential backoff and normalizes the
/// provider's answer. The breaker is owned state, so `complete` takes
/// `&mut self`; share a gateway between tasks behind a `Mutex`.
pub struct Gateway {
    config: GatewayConfig,
    builder: RequestBuilder,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Gateway over HTTP with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        Self::builder().with_config(config).build()
    }

    /// Gateway configured from `~/.zorkai/config.json` and the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(GatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run one chat completion through the breaker and retry loop.
    pub async fn complete(&mut self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let policy = self.config.retry.clone();
        let max_attempts = policy.max_attempts();
        let mut attempts: u32 = 0;
        let mut last_error: Option<ErrorKind> = None;

        loop {
            if !self.breaker.can_execute() {
                error!(
                    event_type = "circuit_breaker_open",
                    circuit_state = %self.breaker.state(),
                    failure_count = self.breaker.failure_count(),
                    model = %request.model,
                    "Circuit breaker is open. Service unavailable until recovery timeout."
                );
                let cause = match &last_error {
                    Some(last) => format!("service unavailable until recovery timeout; last error: {last}"),
                    None => "service unavailable until recovery timeout".to_string(),
                };
                return Err(GatewayError::new(ErrorKind::CircuitOpen(cause), attempts));
            }

            attempts += 1;
            let failure = match self.attempt(request, &policy).await {
                Ok(response) => {
                    self.breaker.call_succeeded();
                    if attempts > 1 {
                        info!(
                            event_type = "llm_retry_succeeded",
                            attempt = attempts,
                            model = %request.model,
                            "API call succeeded after {} attempts",
                            attempts
                        );
                    }
                    return Ok(response);
                }
                Err(failure) => failure,
            };
            self.breaker.call_failed();
            let AttemptFailure { kind, response_text } = failure;

            if !kind.is_retryable() {
                error!(
                    event_type = "llm_request_failed",
                    attempt = attempts,
                    error_type = kind.name(),
                    error_message = %kind,
                    response_text = response_text.as_deref().unwrap_or_default(),
                    model = %request.model,
                    base_url = %self.builder.base_url(),
                    "LLM API request failed: {}",
                    kind
                );
                return Err(GatewayError::new(kind, attempts));
            }

            if attempts >= max_attempts {
                error!(
                    event_type = "llm_retries_exhausted",
                    attempts,
                    error_type = kind.name(),
                    model = %request.model,
                    "LLM API request failed after {} attempts: {}",
                    attempts,
                    kind
                );
                let exhausted = ErrorKind::ExhaustedRetries {
                    attempts,
                    last: Box::new(kind),
                };
                return Err(GatewayError::new(exhausted, attempts));
            }

            let delay = backoff_delay(&policy, attempts - 1);
            let circuit_state = if self.breaker.is_enabled() {
                self.breaker.state().as_str()
            } else {
                "disabled"
            };
            warn!(
                event_type = "llm_retry",
                attempt = attempts,
                max_attempts,
                error_type = kind.name(),
                error_message = %kind,
                backoff_delay = delay.as_secs_f64(),
                model = %request.model,
                circuit_state,
                "API call failed (attempt {}/{}): {}. Retrying in {:.2} seconds...",
                attempts,
                max_attempts,
                kind,
                delay.as_secs_f64()
            );
            last_error = Some(kind);
            tokio::time::sleep(delay).await;
        }
    }

    /// Thin façade shaped like `client.chat.completions.create(...)`.
    pub fn chat(&mut self) -> Chat<'_> {
        Chat { gateway: self }
    }

    async fn attempt(
        &self,
        request: &ChatRequest,
        policy: &RetryPolicy,
    ) -> Result<ChatResponse, AttemptFailure> {
        let data = self
            .builder
            .send(self.transport.as_ref(), request, policy)
            .await?;
        let content = extract_content(&data, &request.model)?;
        let usage = data.get("usage").and_then(Value::as_object).cloned();
        Ok(ChatResponse {
            content: content.into_string(),
            model: request.model.clone(),
            usage,
        })
    }
}

pub struct Chat<'a> {
    gateway: &'a mut Gateway,
}

impl<'a> Chat<'a> {
    pub fn completions(self) -> Completions<'a> {
        Completions {
            gateway: self.gateway,
        }
    }
}

pub struct Completions<'a> {
    gateway: &'a mut Gateway,
}

impl Completions<'_> {
    /// Delegates to [`Gateway::complete`].
    pub async fn create(self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        self.gateway.complete(&request).await
    }
}

pub struct GatewayBuilder {
    config: GatewayConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            transport: None,
        }
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Replace the HTTP transport (tests, custom clients).
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Gateway, ConfigError> {
        self.config.validate()?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()) as Arc<dyn Transport>);
        Ok(Gateway {
            builder: RequestBuilder::new(&self.config),
            breaker: CircuitBreaker::from_policy(&self.config.retry),
            transport,
            config: self.config,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{HttpReply, TransportFailure};
    use crate::types::ChatMessage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Scripted = Result<HttpReply, TransportFailure>;

    /// Replays scripted replies in order, repeating the last one when exhausted.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        last: Mutex<Option<Scripted>>,
        calls: AtomicUsize,
        bodies: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                bodies: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            body: &Value,
            _timeout: Duration,
        ) -> Result<HttpReply, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push(body.clone());
            let next = self.script.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(reply) = next {
                *last = Some(reply);
            }
            last.clone().expect("script must not be empty")
        }
    }

    fn reply(status: u16, body: Value) -> Scripted {
        Ok(HttpReply {
            status,
            body: body.to_string(),
        })
    }

    fn ok(text: &str) -> Scripted {
        reply(
            200,
            json!({
                "choices": [{"message": {"role": "assistant", "content": text}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }),
        )
    }

    fn unavailable() -> Scripted {
        reply(503, json!({"error": "upstream unavailable"}))
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    fn gateway(policy: RetryPolicy, transport: Arc<ScriptedTransport>) -> Gateway {
        Gateway::builder()
            .with_base_url("http://localhost:1234/v1")
            .with_policy(policy)
            .with_transport(transport)
            .build()
            .unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest::new("llama-3", vec![ChatMessage::user("look")])
    }

    #[tokio::test]
    async fn success_returns_normalized_response() {
        let transport = ScriptedTransport::new(vec![ok("  You see a mailbox.  ")]);
        let mut gw = gateway(fast_policy(2), transport.clone());

        let resp = gw.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "You see a mailbox.");
        assert_eq!(resp.model, "llama-3");
        assert_eq!(resp.usage.unwrap()["prompt_tokens"], json!(12));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn persistent_503_exhausts_retries() {
        let transport = ScriptedTransport::new(vec![unavailable()]);
        let mut gw = gateway(fast_policy(2), transport.clone());

        let err = gw.complete(&request()).await.unwrap_err();
        assert_eq!(transport.calls(), 3);
        assert_eq!(err.attempts, 3);
        match err.kind() {
            ErrorKind::ExhaustedRetries { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**last, ErrorKind::ServerError(_)));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert!(matches!(err.last_cause(), ErrorKind::ServerError(_)));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![reply(401, json!({"error": "bad key"}))]);
        let mut gw = gateway(fast_policy(5), transport.clone());

        let err = gw.complete(&request()).await.unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.kind(), ErrorKind::NonRetryable(_)));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            reply(429, json!({"error": "slow down"})),
            Err(TransportFailure::Timeout("deadline".into())),
            ok("north"),
        ]);
        let mut gw = gateway(fast_policy(3), transport.clone());

        let resp = gw.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "north");
        assert_eq!(transport.calls(), 3);
        assert_eq!(gw.breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_network() {
        let mut policy = fast_policy(0);
        policy.failure_threshold = 3;
        let transport = ScriptedTransport::new(vec![unavailable()]);
        let mut gw = gateway(policy, transport.clone());

        for _ in 0..3 {
            let err = gw.complete(&request()).await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::ExhaustedRetries { .. }));
        }
        assert_eq!(transport.calls(), 3);
        assert_eq!(gw.circuit_state(), CircuitState::Open);

        let err = gw.complete(&request()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CircuitOpen(_)));
        assert_eq!(err.attempts, 0);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn breaker_stops_retry_loop_midway() {
        let mut policy = fast_policy(10);
        policy.failure_threshold = 2;
        let transport = ScriptedTransport::new(vec![unavailable()]);
        let mut gw = gateway(policy, transport.clone());

        let err = gw.complete(&request()).await.unwrap_err();
        assert_eq!(transport.calls(), 2);
        assert_eq!(err.attempts, 2);
        let ErrorKind::CircuitOpen(cause) = err.kind() else {
            panic!("expected circuit open, got {err:?}");
        };
        assert!(cause.contains("503"));
    }

    #[tokio::test]
    async fn half_open_probe_closes_breaker() {
        let mut policy = fast_policy(0);
        policy.failure_threshold = 1;
        policy.success_threshold = 1;
        policy.recovery_timeout = Duration::ZERO;
        let transport = ScriptedTransport::new(vec![unavailable(), ok("back")]);
        let mut gw = gateway(policy, transport.clone());

        assert!(gw.complete(&request()).await.is_err());
        assert_eq!(gw.circuit_state(), CircuitState::Open);

        let resp = gw.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "back");
        assert_eq!(gw.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn disabled_breaker_never_blocks() {
        let mut policy = fast_policy(0);
        policy.circuit_breaker_enabled = false;
        policy.failure_threshold = 1;
        let transport = ScriptedTransport::new(vec![unavailable()]);
        let mut gw = gateway(policy, transport.clone());

        for _ in 0..5 {
            assert!(gw.complete(&request()).await.is_err());
        }
        assert_eq!(transport.calls(), 5);
    }

    #[tokio::test]
    async fn unrecognized_shape_is_not_retried() {
        let transport = ScriptedTransport::new(vec![reply(200, json!({"status": "ok", "id": 7}))]);
        let mut gw = gateway(fast_policy(3), transport.clone());

        let err = gw.complete(&request()).await.unwrap_err();
        assert_eq!(transport.calls(), 1);
        let ErrorKind::ExtractionFailure(msg) = err.kind() else {
            panic!("expected extraction failure, got {err:?}");
        };
        assert!(msg.contains("status") && msg.contains("id"));
    }

    #[tokio::test]
    async fn invalid_json_is_an_extraction_failure() {
        let transport = ScriptedTransport::new(vec![Ok(HttpReply {
            status: 200,
            body: "<html>gateway</html>".into(),
        })]);
        let mut gw = gateway(fast_policy(3), transport.clone());

        let err = gw.complete(&request()).await.unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(matches!(err.kind(), ErrorKind::ExtractionFailure(_)));
    }

    #[tokio::test]
    async fn whitespace_answer_is_an_empty_response() {
        let transport = ScriptedTransport::new(vec![ok(" \n ")]);
        let mut gw = gateway(fast_policy(3), transport.clone());

        let resp = gw.complete(&request()).await.unwrap();
        assert!(resp.is_empty());
        assert_eq!(resp.content, "");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn failed_request_logs_long_provider_body() {
        let unknown: Vec<String> = (0..40).map(|i| format!("param_{i:02}")).collect();
        let body = json!({"error": {"message": format!("Unknown parameters: {}", unknown.join(", "))}});
        let transport = ScriptedTransport::new(vec![reply(400, body)]);
        let mut gw = gateway(fast_policy(2), transport.clone());

        let (_guard, logs) = crate::providers::log_capture::capture();
        let err = gw.complete(&request()).await.unwrap_err();

        let ErrorKind::NonRetryable(cause) = err.kind() else {
            panic!("expected non-retryable, got {err:?}");
        };
        assert!(!cause.contains("param_39"));
        assert!(logs.contains("llm_request_failed"));
        assert!(logs.contains("response_text"));
        assert!(logs.contains("param_39"));
    }

    #[tokio::test]
    async fn successful_reply_is_previewed_at_debug() {
        let transport = ScriptedTransport::new(vec![ok("read leaflet")]);
        let mut gw = gateway(fast_policy(0), transport.clone());

        let (_guard, logs) = crate::providers::log_capture::capture();
        gw.complete(&request()).await.unwrap();
        assert!(logs.contains("llm_response_debug"));
        assert!(logs.contains("full_response"));
        assert!(logs.contains("read leaflet"));
    }

    #[tokio::test]
    async fn timeouts_are_retried_even_with_timeout_retries_off() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportFailure::Timeout("deadline elapsed".into())),
            ok("wait"),
        ]);
        let policy = RetryPolicy {
            retry_on_timeout: false,
            ..fast_policy(2)
        };
        let mut gw = gateway(policy, transport.clone());

        let resp = gw.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "wait");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn compatibility_facade_delegates() {
        let transport = ScriptedTransport::new(vec![ok("take lamp")]);
        let mut gw = gateway(fast_policy(0), transport.clone());

        let resp = gw
            .chat()
            .completions()
            .create(request().with_temperature(0.2))
            .await
            .unwrap();
        assert_eq!(resp.content, "take lamp");
        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(bodies[0]["temperature"], json!(0.2));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let policy = RetryPolicy {
            jitter_factor: 2.0,
            ..Default::default()
        };
        assert!(Gateway::builder().with_policy(policy).build().is_err());
    }
}

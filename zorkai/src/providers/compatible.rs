//! OpenAI-compatible `/chat/completions` wire format: payload construction with
//! model-family quirks, and the reqwest transport that carries it.

use super::retry::{classify_response, classify_transport};
use super::sanitize::{sanitize_response_text, truncate_chars};
use super::{AttemptFailure, ErrorKind, HttpReply, Transport, TransportFailure};
use crate::config::{GatewayConfig, RetryPolicy};
use crate::types::{ChatMessage, ChatRequest, Stop};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Model-name fragments of families that reject sampling parameters and
/// structured output, and accept only the `user` role.
const REASONING_MARKERS: [&str; 2] = ["o1-", "o3-"];

const RESPONSE_PREVIEW_CHARS: usize = 1000;

/// Model-name fragments of families known to accept `response_format`.
const STRUCTURED_OUTPUT_MARKERS: [&str; 5] = ["gpt-", "o1-", "o3-", "openai/", "qwen"];

const UNIFORM_ROLE: &str = "user";

pub fn is_reasoning_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    REASONING_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether `response_format` may be sent, judged by model name or endpoint host.
pub fn supports_structured_output(model: &str, base_url: &str) -> bool {
    let lower = model.to_lowercase();
    if STRUCTURED_OUTPUT_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    match url::Url::parse(base_url) {
        Ok(url) => url
            .host_str()
            .map(|host| host == "openai.com" || host.ends_with(".openai.com"))
            .unwrap_or(false),
        Err(_) => base_url.contains("openai.com"),
    }
}

// ---- Request payload (OpenAI wire format) ----

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Stop>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatPayload {
    /// The JSON body. Caller-supplied extra fields override built-in ones.
    pub fn to_json(&self) -> Result<Value, ErrorKind> {
        serde_json::to_value(self)
            .map_err(|e| ErrorKind::NonRetryable(format!("failed to encode request body: {e}")))
    }
}

/// Turns `ChatRequest`s into HTTP requests against one endpoint.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: String,
    api_key: String,
    default_headers: Vec<(String, String)>,
}

impl RequestBuilder {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key().to_string(),
            default_headers: config
                .default_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chat_completions_url(&self) -> String {
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    /// Headers for one request; per-request headers replace defaults of the same name.
    pub fn headers(&self, request: &ChatRequest) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {}", self.api_key)),
        ];
        let defaults = self.default_headers.iter().map(|(k, v)| (k, v));
        let overrides = request.extra_headers.iter().flatten();
        for (name, value) in defaults.chain(overrides) {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        headers
    }

    pub fn payload(&self, request: &ChatRequest) -> ChatPayload {
        let reasoning = is_reasoning_model(&request.model);

        let messages = if reasoning {
            request
                .messages
                .iter()
                .map(|m| ChatMessage::new(UNIFORM_ROLE, m.content.clone()))
                .collect()
        } else {
            request.messages.clone()
        };

        // Reasoning families reject every sampling knob.
        let sampling = |value: Option<f64>| if reasoning { None } else { value };

        let response_format = match &request.response_format {
            Some(_) if reasoning => None,
            Some(format) if supports_structured_output(&request.model, &self.base_url) => {
                Some(format.clone())
            }
            Some(format) => {
                info!(
                    event_type = "structured_output_skipped",
                    model = %request.model,
                    base_url = %self.base_url,
                    response_format = %format,
                    "Skipping structured output for non-OpenAI model: {}",
                    request.model
                );
                None
            }
            None => None,
        };

        ChatPayload {
            model: request.model.clone(),
            messages,
            temperature: sampling(request.temperature),
            top_p: sampling(request.top_p),
            top_k: if reasoning { None } else { request.top_k },
            min_p: sampling(request.min_p),
            max_tokens: request.max_tokens,
            stop: request.stop.clone(),
            response_format,
            extra: request.extra.clone(),
        }
    }

    /// One attempt: POST the request and return the decoded success body.
    /// Every failure comes back classified, with the reply body for non-2xx statuses.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        request: &ChatRequest,
        policy: &RetryPolicy,
    ) -> Result<Value, AttemptFailure> {
        let body = self.payload(request).to_json()?;
        let headers = self.headers(request);
        let url = self.chat_completions_url();

        let reply = transport
            .post_json(&url, &headers, &body, policy.timeout)
            .await
            .map_err(|failure| classify_transport(&failure, policy))?;

        if let Some(kind) = classify_response(reply.status, &reply.body, policy) {
            return Err(AttemptFailure {
                kind,
                response_text: Some(sanitize_response_text(&reply.body)),
            });
        }

        let data: Value = serde_json::from_str(&reply.body).map_err(|e| {
            ErrorKind::ExtractionFailure(format!(
                "Invalid JSON in {} response: {}",
                request.model, e
            ))
        })?;

        debug!(
            event_type = "llm_response_debug",
            model = %request.model,
            response_keys = ?super::normalize::top_level_keys(&data),
            response_size = reply.body.len(),
            has_choices = data.get("choices").is_some(),
            has_candidates = data.get("candidates").is_some(),
            full_response = %truncate_chars(&reply.body, RESPONSE_PREVIEW_CHARS),
            "LLM API response received for model {}",
            request.model
        );

        Ok(data)
    }
}

// ---- reqwest transport ----

/// `Transport` over a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn transport_failure(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportFailure::Connect(err.to_string())
    } else if err.is_builder() {
        TransportFailure::InvalidRequest(err.to_string())
    } else {
        TransportFailure::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply, TransportFailure> {
        let mut req = self.client.post(url).timeout(timeout);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.json(body).send().await.map_err(transport_failure)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport_failure)?;
        Ok(HttpReply { status, body })
    }
}

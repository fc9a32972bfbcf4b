//! Pull the generated text out of whatever JSON shape a provider returns.
//!
//! Each matcher is a pure function from the payload to an optional string;
//! they are tried in order and the first one that fires wins.

use super::ErrorKind;
use super::sanitize::truncate_chars;
use serde_json::Value;
use tracing::{error, warn};

const PREVIEW_CHARS: usize = 500;

/// Top-level fields tried last, each as a string or as `{"text": ...}`.
const FALLBACK_FIELDS: [&str; 5] = ["output", "generated_text", "completion", "message", "answer"];

pub type Matcher = fn(&Value) -> Option<String>;

/// Shape matchers in priority order.
pub const SHAPE_MATCHERS: &[(&str, Matcher)] = &[
    ("choices", match_choices),
    ("candidates", match_candidates),
    ("content_blocks", match_content_blocks),
    ("flat_text", match_flat_text),
    ("response", match_response),
    ("generation", match_generation),
    ("results", match_results),
    ("fallback_fields", match_fallback_fields),
];

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// Non-empty, trimmed text.
    Text(String),
    /// A known shape matched but held nothing but whitespace (or null).
    Empty,
}

impl Extracted {
    pub fn into_string(self) -> String {
        match self {
            Extracted::Text(text) => text,
            Extracted::Empty => String::new(),
        }
    }
}

/// A string value, or null standing for "present but empty".
fn text_or_null(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn first_of<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key)?.as_array()?.first()
}

fn string_or_text_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => value.get("text").and_then(text_or_null),
        _ => None,
    }
}

/// `choices[0].message.content`, `choices[0].content`, `choices[0].text`.
pub fn match_choices(payload: &Value) -> Option<String> {
    let choice = first_of(payload, "choices")?;
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(text_or_null)
        .or_else(|| choice.get("content").and_then(text_or_null))
        .or_else(|| choice.get("text").and_then(text_or_null))
}

/// `candidates[0].content.parts[0].text`, `candidates[0].content.text`, `candidates[0].text`.
pub fn match_candidates(payload: &Value) -> Option<String> {
    let candidate = first_of(payload, "candidates")?;
    let from_content = candidate.get("content").and_then(|content| {
        match content.get("parts").and_then(Value::as_array).and_then(|p| p.first()) {
            // A first part without text is an empty answer, not a mismatch.
            Some(part) => Some(part.get("text").and_then(text_or_null).unwrap_or_default()),
            None => content.get("text").and_then(text_or_null),
        }
    });
    from_content.or_else(|| candidate.get("text").and_then(text_or_null))
}

/// `content[0].text` (block list) or `content` as a plain string.
pub fn match_content_blocks(payload: &Value) -> Option<String> {
    match payload.get("content")? {
        Value::Array(blocks) => blocks.first()?.get("text").and_then(text_or_null),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Scalar `text`, or scalar `content`.
pub fn match_flat_text(payload: &Value) -> Option<String> {
    payload
        .get("text")
        .and_then(text_or_null)
        .or_else(|| payload.get("content").and_then(Value::as_str).map(str::to_string))
}

/// `response` as a string or `response.text`.
pub fn match_response(payload: &Value) -> Option<String> {
    payload.get("response").and_then(string_or_text_field)
}

/// `generation` as a string or `generation.text`.
pub fn match_generation(payload: &Value) -> Option<String> {
    payload.get("generation").and_then(string_or_text_field)
}

/// `results[0].text` or `results[0].content`.
pub fn match_results(payload: &Value) -> Option<String> {
    let result = first_of(payload, "results")?;
    result
        .get("text")
        .and_then(text_or_null)
        .or_else(|| result.get("content").and_then(text_or_null))
}

pub fn match_fallback_fields(payload: &Value) -> Option<String> {
    FALLBACK_FIELDS
        .iter()
        .find_map(|field| payload.get(*field).and_then(string_or_text_field))
}

/// Run the matchers and return the name of the first that fired with its raw text.
pub fn match_shape(payload: &Value) -> Option<(&'static str, String)> {
    SHAPE_MATCHERS
        .iter()
        .find_map(|(name, matcher)| matcher(payload).map(|text| (*name, text)))
}

/// Top-level keys of the payload, in the order the JSON map yields them.
pub fn top_level_keys(payload: &Value) -> Vec<String> {
    payload
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// Extract and trim the generated text.
///
/// An unrecognized shape is an `ExtractionFailure` listing the payload's
/// top-level keys. A recognized shape holding only whitespace is
/// `Extracted::Empty`, reported through an `llm_empty_content` event.
pub fn extract_content(payload: &Value, model: &str) -> Result<Extracted, ErrorKind> {
    let Some((shape, raw)) = match_shape(payload) else {
        let keys = top_level_keys(payload);
        let preview = serde_json::to_string_pretty(payload).unwrap_or_default();
        return Err(ErrorKind::ExtractionFailure(format!(
            "Unable to extract content from {} response. Available keys: [{}]. Response structure: {}",
            model,
            keys.join(", "),
            truncate_chars(&preview, PREVIEW_CHARS)
        )));
    };

    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        return Ok(Extracted::Text(trimmed.to_string()));
    }

    if !raw.is_empty() {
        warn!(
            event_type = "llm_whitespace_only_response",
            model,
            shape,
            raw_response = ?raw,
            "LLM returned only whitespace for model {}",
            model
        );
    }
    error!(
        event_type = "llm_empty_content",
        model,
        shape,
        "LLM returned empty content for model {}",
        model
    );
    Ok(Extracted::Empty)
}

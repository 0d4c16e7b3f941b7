//! Structured-output parsing for model responses.
//!
//! Models are asked to "return ONLY valid JSON" but routinely wrap it in
//! Markdown fences or surround it with prose. [`parse`] pulls the JSON object
//! out of such text and reports failure as a value, so every caller has a
//! deterministic fallback path instead of an error to propagate.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

/// A model response that could not be coerced into a JSON object.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("structured output parse failed: {message}")]
pub struct ParseFailure {
    /// The model response exactly as received.
    pub raw: String,
    pub message: String,
}

impl ParseFailure {
    fn new(raw: &str, message: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            message: message.into(),
        }
    }
}

/// Extract and parse a JSON object from free-form model output.
///
/// A ```` ```json ```` fence wins over any other fence; otherwise the first
/// fenced block is used; otherwise the whole (trimmed) text. The extracted text
/// must parse as a JSON object.
pub fn parse(raw: &str) -> Result<Map<String, Value>, ParseFailure> {
    let candidate = extract_candidate(raw.trim());

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ParseFailure::new(
            raw,
            format!("expected a JSON object, found {}", json_kind(&other)),
        )),
        Err(e) => Err(ParseFailure::new(raw, e.to_string())),
    }
}

/// Like [`parse`], then deserialize the object into `T`.
pub fn parse_as<T: DeserializeOwned>(raw: &str) -> Result<T, ParseFailure> {
    let map = parse(raw)?;
    serde_json::from_value(Value::Object(map)).map_err(|e| ParseFailure::new(raw, e.to_string()))
}

/// Select the slice of `text` that should hold the JSON document.
fn extract_candidate(text: &str) -> &str {
    if let Some(start) = text.find(JSON_FENCE) {
        return fence_interior(&text[start + JSON_FENCE.len()..]);
    }
    if let Some(start) = text.find(FENCE) {
        return fence_interior(&text[start + FENCE.len()..]);
    }
    text
}

/// Everything up to the closing fence, or to the end if the fence is unterminated.
fn fence_interior(after_open: &str) -> &str {
    let end = after_open.find(FENCE).unwrap_or(after_open.len());
    after_open[..end].trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

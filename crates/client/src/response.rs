//! Response interpreter.
//!
//! Every call path routes its raw response through [`classify`], which
//! sorts it into exactly one [`Outcome`]. Status first (2xx / 4xx / other),
//! then Content-Type decides between JSON and a binary artifact.

use serde_json::Value;

use compredict_protocol::is_error_flag_set;

use crate::error::{ErrorEnvelope, ErrorKind};
use crate::transport::{RawResponse, TransportError};

// ── Constants ───────────────────────────────────────────────────────

const HTML_MESSAGE_START: &str = "Exception Value:";
const HTML_MESSAGE_END: &str = "Request information";
const FALLBACK_MESSAGE: &str = "Internal Server Error";
const MAX_RAW_BODY: usize = 64 * 1024;

/// Classified response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    JsonSuccess(Value),
    BinarySuccess { content_type: String, bytes: Vec<u8> },
    ClientFailure(ErrorEnvelope),
    ServerFailure(ErrorEnvelope),
}

/// Classify a raw response.
pub fn classify(status: u16, headers: &[(String, String)], body: &[u8]) -> Outcome {
    let content_type = header(headers, "content-type").map(str::to_string);
    let text = String::from_utf8_lossy(body);

    if !(200..300).contains(&status) {
        let envelope = failure_envelope(status, &text);
        return if (400..500).contains(&status) {
            Outcome::ClientFailure(envelope)
        } else {
            Outcome::ServerFailure(envelope)
        };
    }

    match content_type.as_deref() {
        Some(ct) if is_json_content_type(ct) => match parse_json_body(body) {
            Ok(json) => json_success(status, json, &text),
            Err(e) => Outcome::ServerFailure(
                ErrorEnvelope::new(ErrorKind::Server, status, format!("invalid JSON in response body: {}", e))
                    .with_raw_body(truncate(&text)),
            ),
        },
        Some(ct) => Outcome::BinarySuccess {
            content_type: ct.to_string(),
            bytes: body.to_vec(),
        },
        // No Content-Type: JSON if it parses, raw bytes otherwise
        None => match parse_json_body(body) {
            Ok(json) => json_success(status, json, &text),
            Err(_) => Outcome::BinarySuccess {
                content_type: "application/octet-stream".into(),
                bytes: body.to_vec(),
            },
        },
    }
}

/// Classify a response returned by a [`crate::Transport`].
pub fn classify_response(response: &RawResponse) -> Outcome {
    classify(response.status, &response.headers, &response.body)
}

/// A request that never produced a response is a server-side failure.
pub fn from_transport_error(err: &TransportError) -> Outcome {
    Outcome::ServerFailure(ErrorEnvelope::new(ErrorKind::Server, 0, err.to_string()))
}

/// Best-effort message from an HTML error page.
///
/// Takes the text between the `Exception Value:` and `Request information`
/// markers of a framework debug page. Falls back to "Internal Server Error"
/// when either marker is missing or nothing sits between them.
pub fn extract_error_message(text: &str) -> String {
    let (Some(begin), Some(end)) = (text.find(HTML_MESSAGE_START), text.find(HTML_MESSAGE_END)) else {
        return FALLBACK_MESSAGE.to_string();
    };
    let start = begin + HTML_MESSAGE_START.len() + 1;
    let stop = end.saturating_sub(1);
    match text.get(start..stop).map(str::trim) {
        Some(msg) if !msg.is_empty() => msg.to_string(),
        _ => FALLBACK_MESSAGE.to_string(),
    }
}

/// `image/png` → `features.png`. Parameters after `;` are dropped.
pub fn file_name_for_content_type(content_type: &str) -> String {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    let subtype = essence.split('/').nth(1).filter(|s| !s.is_empty()).unwrap_or("bin");
    format!("features.{}", subtype)
}

pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ── Internal helpers ────────────────────────────────────────────────

fn parse_json_body(body: &[u8]) -> Result<Value, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
}

fn json_success(status: u16, json: Value, text: &str) -> Outcome {
    // The service may answer 200 with "error": "True"
    if is_error_flag_set(&json) {
        let message = json_message(&json).unwrap_or_else(|| FALLBACK_MESSAGE.to_string());
        return Outcome::ClientFailure(
            ErrorEnvelope::new(ErrorKind::Client, status, message)
                .with_errors(error_list(&json))
                .with_raw_body(truncate(text)),
        );
    }
    Outcome::JsonSuccess(json)
}

fn failure_envelope(status: u16, text: &str) -> ErrorEnvelope {
    let kind = if (400..500).contains(&status) { ErrorKind::Client } else { ErrorKind::Server };
    let (message, errors) = match serde_json::from_str::<Value>(text) {
        Ok(json) => {
            let errors = error_list(&json);
            let message = json_message(&json).unwrap_or_else(|| reason_phrase(status));
            (message, errors)
        }
        Err(_) => (extract_error_message(text), Vec::new()),
    };
    ErrorEnvelope::new(kind, status, message)
        .with_errors(errors)
        .with_raw_body(truncate(text))
}

/// `error_msg`, then the `errors` list, then `detail` / `message`.
fn json_message(json: &Value) -> Option<String> {
    if let Some(msg) = json.get("error_msg").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    let errors = error_list(json);
    if !errors.is_empty() {
        return Some(errors.join("; "));
    }
    ["detail", "message"]
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str))
        .map(String::from)
}

fn error_list(json: &Value) -> Vec<String> {
    match json.get("errors") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().map(value_text).collect(),
        Some(Value::Object(fields)) => fields
            .iter()
            .flat_map(|(field, v)| match v {
                Value::Array(items) => items.iter().map(|i| format!("{}: {}", field, value_text(i))).collect(),
                other => vec![format!("{}: {}", field, value_text(other))],
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn reason_phrase(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(String::from)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_RAW_BODY {
        return text.to_string();
    }
    let mut end = MAX_RAW_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

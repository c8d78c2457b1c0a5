//! Request builder.
//!
//! Query strings, callback encoding, payload content negotiation and the
//! encrypted-payload attachment for job submissions.
//!
//! # Job body wire format
//!
//! JSON payloads (`application/json`) go out as a JSON document:
//!
//! | Field            | Type   | Notes                                        |
//! |------------------|--------|----------------------------------------------|
//! | `data`           | string | JSON text of the payload, or base64 blob     |
//! | `encrypted`      | bool   | present and `true` only for encrypted blobs  |
//! | `callback_url`   | string | pipe-delimited when several URLs             |
//! | `callback_param` | string | JSON-encoded                                 |
//! | `evaluate`       | string | compact JSON of extra evaluation parameters  |
//!
//! Binary payloads go out as multipart: a `features` file part plus the
//! same extra fields as text parts.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use base64::Engine;
use rsa::RsaPublicKey;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::crypto;
use crate::error::Error;
use crate::response::file_name_for_content_type;
use crate::transport::RequestBody;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Binary payload types the service accepts.
pub const SUPPORTED_BINARY_TYPES: &[&str] = &["application/parquet", "application/octet-stream", "text/csv"];

/// Multipart field carrying the payload file.
pub const FEATURES_FIELD: &str = "features";

const CALLBACK_DELIMITER: &str = "|";

// ── Query strings ───────────────────────────────────────────────────

/// `[("type","input"),("version","1.2.2")]` → `?type=input&version=1.2.2`.
///
/// Caller order is kept. Values are form-encoded. No params → empty string.
pub fn build_get_args<K: AsRef<str>, V: AsRef<str>>(params: &[(K, V)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k.as_ref()), encode(v.as_ref())))
        .collect();
    format!("?{}", pairs.join("&"))
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Percent-encode one URL path segment. `/`, `?` and `#` never survive raw,
/// and spaces become `%20` rather than the form encoding's `+`.
pub fn path_segment(raw: &str) -> String {
    encode(raw).replace('+', "%20")
}

// ── Callbacks ───────────────────────────────────────────────────────

/// One callback URL or several. Callers pass either form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackUrls {
    Single(String),
    Many(Vec<String>),
}

impl From<&str> for CallbackUrls {
    fn from(url: &str) -> Self {
        CallbackUrls::Single(url.to_string())
    }
}

impl From<String> for CallbackUrls {
    fn from(url: String) -> Self {
        CallbackUrls::Single(url)
    }
}

impl From<Vec<String>> for CallbackUrls {
    fn from(urls: Vec<String>) -> Self {
        CallbackUrls::Many(urls)
    }
}

impl From<Vec<&str>> for CallbackUrls {
    fn from(urls: Vec<&str>) -> Self {
        CallbackUrls::Many(urls.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for CallbackUrls {
    fn from(urls: &[&str]) -> Self {
        CallbackUrls::Many(urls.iter().map(|u| u.to_string()).collect())
    }
}

/// Several URLs are joined with `|`; a single URL is returned unchanged.
pub fn set_callback_urls(value: impl Into<CallbackUrls>) -> String {
    match value.into() {
        CallbackUrls::Single(url) => url,
        CallbackUrls::Many(urls) => urls.join(CALLBACK_DELIMITER),
    }
}

/// JSON-encode callback parameters. An array is encoded element by element
/// and pipe-joined, matching one parameter object per callback URL.
pub fn encode_callback_params(params: &Value) -> String {
    match params {
        Value::Array(items) => items
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(CALLBACK_DELIMITER),
        other => other.to_string(),
    }
}

/// Compact JSON for the `evaluate` side-channel field.
pub fn process_evaluate(params: &Map<String, Value>) -> String {
    Value::Object(params.clone()).to_string()
}

// ── Payloads ────────────────────────────────────────────────────────

/// Job payload supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum JobData {
    /// Structured data, sent as JSON.
    Json(Value),
    /// Pre-encoded file content (parquet, csv, ...).
    Bytes(Vec<u8>),
}

impl From<Value> for JobData {
    fn from(value: Value) -> Self {
        JobData::Json(value)
    }
}

impl From<Vec<u8>> for JobData {
    fn from(bytes: Vec<u8>) -> Self {
        JobData::Bytes(bytes)
    }
}

/// Payload after content negotiation.
#[derive(Debug)]
pub enum ProcessedData {
    Json(String),
    File(FileArtifact),
}

/// `application/json` serializes to a string; supported binary types are
/// written to a scoped temporary file. Anything else is a configuration error.
pub fn process_data(content_type: &str, data: &JobData) -> Result<ProcessedData, Error> {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();

    if essence == JSON_CONTENT_TYPE {
        return match data {
            JobData::Json(value) => Ok(ProcessedData::Json(value.to_string())),
            JobData::Bytes(_) => Err(Error::Configuration(
                "raw bytes cannot be sent as application/json; pass JSON data".into(),
            )),
        };
    }

    if !SUPPORTED_BINARY_TYPES.contains(&essence.as_str()) {
        return Err(Error::Configuration(format!("unsupported content type '{}'", content_type)));
    }
    match data {
        JobData::Bytes(bytes) => Ok(ProcessedData::File(FileArtifact::write(&essence, bytes)?)),
        JobData::Json(_) => Err(Error::Configuration(format!(
            "JSON data cannot be sent as '{}'; pass pre-encoded bytes",
            content_type
        ))),
    }
}

/// Assemble the body of a run/train submission.
///
/// `fields` are the extra wire fields (callback, evaluate, version, ...).
/// With a `recipient`, the payload is replaced by the encrypted blob.
pub fn build_job_body(
    content_type: &str,
    data: &JobData,
    fields: Vec<(String, Value)>,
    recipient: Option<&RsaPublicKey>,
) -> Result<RequestBody, Error> {
    let data = match (recipient, data) {
        (Some(key), JobData::Bytes(bytes)) => JobData::Bytes(crypto::encrypt(bytes, key)?),
        _ => data.clone(),
    };

    match process_data(content_type, &data)? {
        ProcessedData::Json(text) => {
            let mut body = Map::new();
            let payload = match recipient {
                Some(key) => {
                    let blob = crypto::encrypt(text.as_bytes(), key)?;
                    body.insert("encrypted".into(), Value::Bool(true));
                    base64::engine::general_purpose::STANDARD.encode(blob)
                }
                None => text,
            };
            body.insert("data".into(), Value::String(payload));
            for (name, value) in fields {
                body.insert(name, value);
            }
            Ok(RequestBody::Json(Value::Object(body).to_string()))
        }
        ProcessedData::File(file) => {
            let mut text_fields: Vec<(String, String)> = fields
                .into_iter()
                .map(|(name, value)| match value {
                    Value::String(s) => (name, s),
                    other => (name, other.to_string()),
                })
                .collect();
            if recipient.is_some() {
                text_fields.push(("encrypted".into(), "true".into()));
            }
            Ok(RequestBody::Multipart {
                fields: text_fields,
                file_field: FEATURES_FIELD.to_string(),
                file,
            })
        }
    }
}

// ── Scoped temporary artifacts ──────────────────────────────────────

/// A temporary file removed when dropped.
///
/// Used for outgoing binary payloads and for downloaded artifacts. Handed
/// out already written and rewound to the start.
pub struct FileArtifact {
    file: NamedTempFile,
    file_name: String,
    content_type: String,
}

impl FileArtifact {
    /// Write `bytes` to a fresh temporary file and seek back to the start.
    pub fn write(content_type: &str, bytes: &[u8]) -> Result<Self, Error> {
        let file_name = file_name_for_content_type(content_type);
        let suffix = file_name.trim_start_matches("features");
        let mut file = tempfile::Builder::new()
            .prefix("features-")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            file,
            file_name,
            content_type: content_type.to_string(),
        })
    }

    /// `features.<subtype>`, the name sent to / received from the service.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// On-disk location; valid until the artifact is dropped.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Independent read handle starting at offset 0.
    pub fn reopen(&self) -> io::Result<std::fs::File> {
        self.file.reopen()
    }

    /// Read the whole artifact from its current position.
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for FileArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileArtifact")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("path", &self.file.path())
            .finish()
    }
}

impl Read for FileArtifact {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileArtifact {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

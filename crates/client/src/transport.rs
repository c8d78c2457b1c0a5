//! Transport collaborator.
//!
//! The client core never talks HTTP directly: it hands an [`HttpRequest`]
//! to a [`Transport`] and gets status, headers and body back. Pooling,
//! TLS and timeouts live here, not in the core.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::multipart;

use crate::request::FileArtifact;

pub const USER_AGENT: &str = concat!("compredict-client/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// Outgoing request body.
#[derive(Debug)]
pub enum RequestBody {
    Empty,
    /// Pre-serialized JSON document.
    Json(String),
    /// Text fields plus one file part. The file part owns its temporary
    /// artifact, so dropping the request removes it.
    Multipart {
        fields: Vec<(String, String)>,
        file_field: String,
        file: FileArtifact,
    },
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// Raw response as the transport saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The request never produced a response (DNS, refused connection, timeout).
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportError {}

/// Something that can execute a request synchronously.
pub trait Transport {
    fn execute(&self, request: &HttpRequest) -> Result<RawResponse, TransportError>;

    /// Toggle remote certificate validation. Transports without TLS ignore it.
    fn set_verify_peer(&mut self, _verify: bool) {}
}

// ── reqwest implementation ──────────────────────────────────────────

/// Blocking reqwest transport (no Tokio runtime required).
pub struct HttpTransport {
    http: reqwest::blocking::Client,
    timeout: Duration,
    verify_peer: bool,
}

impl HttpTransport {
    pub fn new(timeout: Duration, verify_peer: bool) -> Self {
        Self {
            http: build_http(timeout, verify_peer),
            timeout,
            verify_peer,
        }
    }

    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS), true)
    }
}

fn build_http(timeout: Duration, verify_peer: bool) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .danger_accept_invalid_certs(!verify_peer)
        .build()
        .expect("Failed to create HTTP client")
}

impl Transport for HttpTransport {
    fn execute(&self, request: &HttpRequest) -> Result<RawResponse, TransportError> {
        let mut req = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
            Method::Delete => self.http.delete(&request.url),
        };
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        req = match &request.body {
            RequestBody::Empty => req,
            RequestBody::Json(text) => req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(text.clone()),
            RequestBody::Multipart { fields, file_field, file } => {
                let mut form = multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                let part = multipart::Part::reader(file.reopen().map_err(|e| TransportError(e.to_string()))?)
                    .file_name(file.file_name().to_string())
                    .mime_str(file.content_type())
                    .map_err(|e| TransportError(e.to_string()))?;
                req.multipart(form.part(file_field.clone(), part))
            }
        };

        let response = req.send().map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .map_err(|e| TransportError(e.to_string()))?
            .to_vec();

        Ok(RawResponse { status, headers, body })
    }

    fn set_verify_peer(&mut self, verify: bool) {
        if verify != self.verify_peer {
            self.verify_peer = verify;
            self.http = build_http(self.timeout, verify);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_keeps_header_order() {
        let req = HttpRequest::new(Method::Get, "https://core.compredict.ai/api/v1/algorithms")
            .header("Authorization", "Token abc")
            .header("Accept", "application/json");
        assert_eq!(req.headers[0].0, "Authorization");
        assert_eq!(req.headers[1].0, "Accept");
        assert!(matches!(req.body, RequestBody::Empty));
    }

    #[test]
    fn test_verify_peer_toggle() {
        let mut transport = HttpTransport::default();
        assert!(transport.verify_peer());
        transport.set_verify_peer(false);
        assert!(!transport.verify_peer());
    }

    #[test]
    fn test_unreachable_host_is_transport_error() {
        let transport = HttpTransport::new(Duration::from_secs(2), true);
        // Port 9 (discard) on localhost is closed on test machines
        let err = transport
            .execute(&HttpRequest::new(Method::Get, "http://127.0.0.1:9/"))
            .unwrap_err();
        assert!(!err.0.is_empty());
    }
}

//! Error taxonomy for AI Core operations.
//!
//! `Client` and `Server` come from the remote service and obey the
//! client's `fail_on_error` policy. `Configuration`, `Crypto` and `Io`
//! point at a defect in the calling code or the local machine and are
//! always returned.

use std::fmt;

use compredict_protocol::MapError;

/// Which side of the wire a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 4xx: bad request, bad credentials, throttling.
    Client,
    /// 5xx, transport failure or an unreadable success body.
    Server,
}

/// Normalized description of a failed response.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    /// Server message, verbatim when the service provided one.
    pub message: String,
    /// HTTP status; 0 when the request never reached the service.
    pub status_code: u16,
    pub raw_body: String,
    /// Server-provided error list (`errors`), if any.
    pub errors: Vec<String>,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code,
            raw_body: String::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_raw_body(mut self, raw_body: impl Into<String>) -> Self {
        self.raw_body = raw_body.into();
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Error type for AI Core operations.
#[derive(Debug)]
pub enum Error {
    /// Caller-correctable rejection (4xx)
    Client(ErrorEnvelope),
    /// Service or transport failure
    Server(ErrorEnvelope),
    /// Programmer error: unknown resource kind, unsupported content type, bad key format
    Configuration(String),
    /// Missing or unusable key material, or a blob that fails to unwrap
    Crypto(String),
    /// Local file I/O (temporary artifacts, key files, config files)
    Io(String),
}

impl Error {
    /// The remote failure, for `Client` and `Server` errors.
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            Error::Client(env) | Error::Server(env) => Some(env),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.envelope().map(|env| env.status_code)
    }
}

impl From<ErrorEnvelope> for Error {
    fn from(env: ErrorEnvelope) -> Self {
        match env.kind {
            ErrorKind::Client => Error::Client(env),
            ErrorKind::Server => Error::Server(env),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Remote messages are printed exactly as the service sent them.
            Error::Client(env) | Error::Server(env) => write!(f, "{}", env.message),
            Error::Configuration(msg) => write!(f, "{}", msg),
            Error::Crypto(msg) => write!(f, "Crypto error: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Outcome of splitting a mapper error into raise-always vs. policy-governed.
pub(crate) enum MapFailure {
    Raise(Error),
    Remote(ErrorEnvelope),
}

/// Unknown resource names are programmer errors; bad payloads are a
/// service-side problem and follow `fail_on_error`.
pub(crate) fn classify_map_error(err: MapError, raw_body: &str) -> MapFailure {
    match err {
        MapError::UnknownResource(_) => MapFailure::Raise(Error::Configuration(err.to_string())),
        MapError::InvalidData { .. } => MapFailure::Remote(
            ErrorEnvelope::new(ErrorKind::Server, 200, err.to_string()).with_raw_body(raw_body),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_print_message_verbatim() {
        let err = Error::from(ErrorEnvelope::new(ErrorKind::Client, 400, "Bad request"));
        assert!(matches!(err, Error::Client(_)));
        assert_eq!(err.to_string(), "Bad request");
        assert_eq!(err.status_code(), Some(400));

        let err = Error::from(ErrorEnvelope::new(ErrorKind::Server, 500, "division by zero"));
        assert!(matches!(err, Error::Server(_)));
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn test_unknown_resource_always_raises() {
        match classify_map_error(MapError::UnknownResource("Tassk".into()), "") {
            MapFailure::Raise(Error::Configuration(msg)) => assert!(msg.contains("Tassk")),
            _ => panic!("unknown resource must be a configuration error"),
        }
    }

    #[test]
    fn test_invalid_payload_is_remote_failure() {
        let err = MapError::InvalidData { resource: "Task".into(), message: "missing field `reference`".into() };
        match classify_map_error(err, "{}") {
            MapFailure::Remote(env) => {
                assert_eq!(env.kind, ErrorKind::Server);
                assert_eq!(env.raw_body, "{}");
            }
            _ => panic!("bad payload must follow the fail_on_error policy"),
        }
    }
}

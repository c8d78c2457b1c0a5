//! Token manager.
//!
//! Holds the current access/refresh pair and attaches it to outgoing
//! requests. State machine:
//!
//! ```text
//! Unauthenticated ──login──▶ Authenticated ──refresh──▶ Refreshing ──ok──▶ Authenticated
//!        ▲                        │                          │
//!        └──── clear / rejected verify / failed refresh ◀────┘
//! ```
//!
//! Nothing refreshes automatically. Callers drive `refresh_token` themselves.

use std::fmt;

use log::info;
use serde::Deserialize;
use serde_json::{json, Value};

use compredict_protocol::is_error_flag_set;

use crate::error::{Error, ErrorEnvelope, ErrorKind};
use crate::response::Outcome;
use crate::transport::{HttpRequest, Method, RequestBody};

/// Length of a static AI Core API key.
pub const API_KEY_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

/// How the access token is presented in the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Token <key>`, for static API keys.
    Token,
    /// `Bearer <token>`, for tokens issued by the login endpoint.
    Bearer,
}

impl AuthScheme {
    fn prefix(&self) -> &'static str {
        match self {
            AuthScheme::Token => "Token",
            AuthScheme::Bearer => "Bearer",
        }
    }
}

/// Tokens issued by the login endpoint.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    #[serde(alias = "access")]
    pub token: String,
    #[serde(alias = "refresh")]
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RefreshedToken {
    #[serde(alias = "access")]
    token: String,
}

pub struct TokenManager {
    access: Option<String>,
    refresh: Option<String>,
    scheme: AuthScheme,
    state: AuthState,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("state", &self.state)
            .field("scheme", &self.scheme)
            .field("has_refresh", &self.refresh.is_some())
            .finish()
    }
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            access: None,
            refresh: None,
            scheme: AuthScheme::Bearer,
            state: AuthState::Unauthenticated,
        }
    }

    /// Authenticate with a static API key.
    pub fn set_api_key(&mut self, key: &str) -> Result<(), Error> {
        if key.chars().count() != API_KEY_LEN {
            return Err(Error::Configuration("API Key is not in valid format!".into()));
        }
        self.access = Some(key.to_string());
        self.refresh = None;
        self.scheme = AuthScheme::Token;
        self.state = AuthState::Authenticated;
        Ok(())
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh.as_deref()
    }

    /// Value for the `Authorization` header, if authenticated.
    pub fn authorization_header(&self) -> Option<String> {
        self.access
            .as_ref()
            .map(|token| format!("{} {}", self.scheme.prefix(), token))
    }

    /// Attach the current token to `request`. Unauthenticated requests go out bare.
    pub fn authorize(&self, request: HttpRequest) -> HttpRequest {
        match self.authorization_header() {
            Some(value) => request.header("Authorization", value),
            None => request,
        }
    }

    /// Explicit logout.
    pub fn clear(&mut self) {
        if self.state != AuthState::Unauthenticated {
            info!("token cleared");
        }
        self.access = None;
        self.refresh = None;
        self.state = AuthState::Unauthenticated;
    }

    // ── Login ───────────────────────────────────────────────────────

    pub fn login_request(url: &str, username: &str, password: &str) -> HttpRequest {
        json_post(url, json!({ "username": username, "password": password }))
    }

    /// Store the issued pair. Failures leave the current state untouched.
    pub fn complete_login(&mut self, outcome: Outcome) -> Result<TokenPair, Error> {
        let json = success_json(outcome)?;
        let pair = TokenPair::deserialize(&json)
            .map_err(|e| unexpected_body(format!("token response missing fields: {}", e), &json))?;

        self.access = Some(pair.token.clone());
        self.refresh = Some(pair.refresh_token.clone());
        self.scheme = AuthScheme::Bearer;
        self.state = AuthState::Authenticated;
        info!("authenticated with issued token pair");
        Ok(pair)
    }

    // ── Refresh ─────────────────────────────────────────────────────

    pub fn refresh_request(url: &str, refresh_token: &str) -> HttpRequest {
        json_post(url, json!({ "refresh_token": refresh_token }))
    }

    pub fn begin_refresh(&mut self) {
        self.state = AuthState::Refreshing;
    }

    /// Replace the access token only. A failed refresh logs out of issued
    /// tokens; a static API key survives it.
    pub fn complete_refresh(&mut self, refresh_token: &str, outcome: Outcome) -> Result<String, Error> {
        let parsed = success_json(outcome).and_then(|json| {
            RefreshedToken::deserialize(&json)
                .map_err(|e| unexpected_body(format!("refresh response missing token: {}", e), &json))
        });
        match parsed {
            Ok(fresh) => {
                self.access = Some(fresh.token.clone());
                if self.refresh.is_none() {
                    self.refresh = Some(refresh_token.to_string());
                }
                self.scheme = AuthScheme::Bearer;
                self.state = AuthState::Authenticated;
                info!("access token refreshed");
                Ok(fresh.token)
            }
            Err(e) => {
                match (self.scheme, self.access.is_some()) {
                    (AuthScheme::Token, true) => self.state = AuthState::Authenticated,
                    _ => self.clear(),
                }
                Err(e)
            }
        }
    }

    // ── Verify ──────────────────────────────────────────────────────

    pub fn verify_request(url: &str, token: &str) -> HttpRequest {
        json_post(url, json!({ "token": token }))
    }

    /// `Ok(true)` / `Ok(false)` for an answered verification. Throttling and
    /// rejection come back as client errors. A rejected current token is
    /// cleared; throttling clears nothing.
    pub fn complete_verify(&mut self, token: &str, outcome: Outcome) -> Result<bool, Error> {
        let is_current = self.access.as_deref() == Some(token);
        match outcome {
            Outcome::ClientFailure(env) => {
                if is_current && env.status_code != 429 {
                    self.clear();
                }
                Err(Error::Client(env))
            }
            other => {
                let json = success_json(other)?;
                let valid = !is_error_flag_set(&json)
                    && json.get("valid").and_then(Value::as_bool).unwrap_or(true);
                if !valid && is_current {
                    self.clear();
                }
                Ok(valid)
            }
        }
    }
}

fn json_post(url: &str, body: Value) -> HttpRequest {
    HttpRequest::new(Method::Post, url).body(RequestBody::Json(body.to_string()))
}

/// Auth endpoints always raise: they are driven by explicit caller action.
fn success_json(outcome: Outcome) -> Result<Value, Error> {
    match outcome {
        Outcome::JsonSuccess(json) => Ok(json),
        Outcome::BinarySuccess { content_type, .. } => Err(Error::Server(ErrorEnvelope::new(
            ErrorKind::Server,
            200,
            format!("unexpected content type '{}' from auth endpoint", content_type),
        ))),
        Outcome::ClientFailure(env) => Err(Error::Client(env)),
        Outcome::ServerFailure(env) => Err(Error::Server(env)),
    }
}

fn unexpected_body(message: String, json: &Value) -> Error {
    Error::Server(ErrorEnvelope::new(ErrorKind::Server, 200, message).with_raw_body(json.to_string()))
}

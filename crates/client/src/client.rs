//! AI Core client facade.
//!
//! Every operation runs the same pipeline: build the request, optionally
//! encrypt the payload, execute it on the transport, classify the response,
//! map the JSON onto a resource.
//!
//! Remote failures (`Client`/`Server`) follow `fail_on_error`: raised when
//! set, otherwise recorded in [`Client::last_error`] and the call returns
//! `Ok(None)`. Configuration, crypto and I/O errors are always raised.

use std::time::Duration;

use base64::Engine;
use log::{debug, warn};
use serde_json::{Map, Value};

use compredict_protocol::{map_collection, map_typed, Algorithm, MapError, Mapped, Prediction, Task, Version};

use crate::config::ClientConfig;
use crate::crypto::{self, KeyMaterial};
use crate::error::{classify_map_error, Error, ErrorEnvelope, ErrorKind, MapFailure};
use crate::request::{
    build_get_args, build_job_body, encode_callback_params, path_segment, process_evaluate, set_callback_urls,
    CallbackUrls, FileArtifact, JobData, JSON_CONTENT_TYPE,
};
use crate::response::{classify_response, from_transport_error, Outcome};
use crate::token::{TokenManager, TokenPair};
use crate::transport::{HttpRequest, HttpTransport, Method, RequestBody, Transport};

/// Result of [`Client::run_algorithm`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Queued job; poll it with [`Client::get_task_results`].
    Task(Task),
    /// The service answered synchronously.
    Prediction(Prediction),
}

impl Submission {
    pub fn task(&self) -> Option<&Task> {
        match self {
            Submission::Task(t) => Some(t),
            Submission::Prediction(_) => None,
        }
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            Submission::Prediction(p) => Some(p),
            Submission::Task(_) => None,
        }
    }
}

/// Which side of an algorithm a template or graph describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Input,
    Output,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Input => "input",
            FileType::Output => "output",
        }
    }
}

/// Options for [`Client::run_algorithm`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured default callback.
    pub callback_url: Option<CallbackUrls>,
    pub callback_param: Option<Value>,
    /// Extra evaluation parameters, sent as compact JSON.
    pub evaluate: Option<Map<String, Value>>,
    pub version: Option<String>,
    /// Payload content type; `application/json` when unset.
    pub content_type: Option<String>,
    /// Encrypt the payload with the configured key material.
    pub encrypt: bool,
}

/// Options for [`Client::train_algorithm`].
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    pub callback_url: Option<CallbackUrls>,
    pub callback_param: Option<Value>,
    pub version: Option<String>,
    /// Publish the trained model as a new algorithm version.
    pub export_new_version: bool,
    pub content_type: Option<String>,
    pub encrypt: bool,
}

/// AI Core API client (blocking).
///
/// Holds mutable state (`last_error`, tokens, flags) and takes `&mut self`
/// for every remote call. Share it across threads behind your own lock.
pub struct Client<T: Transport = HttpTransport> {
    transport: T,
    base: String,
    tokens: TokenManager,
    callback_url: Option<String>,
    fail_on_error: bool,
    verify_peer: bool,
    keys: Option<KeyMaterial>,
    last_error: Option<Error>,
}

impl Client<HttpTransport> {
    /// Client over the blocking reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let transport = HttpTransport::new(Duration::from_secs(config.timeout_secs), config.verify_peer);
        Self::with_transport(config, transport)
    }

    /// Client configured from the config file and `COMPREDICT_AI_CORE_*` variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(ClientConfig::load()?)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, mut transport: T) -> Result<Self, Error> {
        config.validate()?;

        let mut tokens = TokenManager::new();
        if let Some(key) = &config.api_key {
            tokens.set_api_key(key)?;
        }
        let keys = config.key_material()?;
        transport.set_verify_peer(config.verify_peer);

        Ok(Self {
            transport,
            base: config.normalized_base(),
            tokens,
            callback_url: config.callback_url,
            fail_on_error: config.fail_on_error,
            verify_peer: config.verify_peer,
            keys,
            last_error: None,
        })
    }

    // ── Settings ────────────────────────────────────────────────────

    pub fn set_fail_on_error(&mut self, fail: bool) {
        self.fail_on_error = fail;
    }

    pub fn fails_on_error(&self) -> bool {
        self.fail_on_error
    }

    /// Delegated to the transport.
    pub fn set_verify_peer(&mut self, verify: bool) {
        self.verify_peer = verify;
        self.transport.set_verify_peer(verify);
    }

    pub fn verifies_peer(&self) -> bool {
        self.verify_peer
    }

    /// Failure recorded by the most recent call when `fail_on_error` is off.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    pub fn set_api_key(&mut self, key: &str) -> Result<(), Error> {
        self.tokens.set_api_key(key)
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Drop every stored token.
    pub fn logout(&mut self) {
        self.tokens.clear();
    }

    pub fn set_key_material(&mut self, keys: Option<KeyMaterial>) {
        self.keys = keys;
    }

    pub fn key_material(&self) -> Option<&KeyMaterial> {
        self.keys.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ── Jobs ────────────────────────────────────────────────────────

    /// Submit a prediction job.
    pub fn run_algorithm(
        &mut self,
        algorithm_id: &str,
        data: impl Into<JobData>,
        opts: &RunOptions,
    ) -> Result<Option<Submission>, Error> {
        self.last_error = None;

        let mut fields = self.callback_fields(opts.callback_url.as_ref(), opts.callback_param.as_ref());
        if let Some(evaluate) = &opts.evaluate {
            fields.push(("evaluate".into(), Value::String(process_evaluate(evaluate))));
        }
        if let Some(version) = &opts.version {
            fields.push(("version".into(), Value::String(version.clone())));
        }
        let data: JobData = data.into();
        let body = self.job_body(opts.content_type.as_deref(), &data, fields, opts.encrypt)?;

        let url = self.endpoint(&format!("v1/algorithms/{}/predict", path_segment(algorithm_id)));
        let outcome = self.execute(HttpRequest::new(Method::Post, url).body(body));
        let Some(json) = self.expect_json(outcome)? else {
            return Ok(None);
        };

        if is_task_body(&json) {
            return Ok(self.map_task(&json)?.map(Submission::Task));
        }
        match serde_json::from_value::<Prediction>(json.clone()) {
            Ok(prediction) => Ok(Some(Submission::Prediction(prediction))),
            Err(e) => self.fail(
                ErrorEnvelope::new(ErrorKind::Server, 200, format!("invalid Prediction payload: {}", e))
                    .with_raw_body(json.to_string()),
            ),
        }
    }

    /// Submit a training job. The returned task carries the service's `job_id`.
    pub fn train_algorithm(
        &mut self,
        algorithm_id: &str,
        data: impl Into<JobData>,
        opts: &TrainOptions,
    ) -> Result<Option<Task>, Error> {
        self.last_error = None;

        let mut fields = self.callback_fields(opts.callback_url.as_ref(), opts.callback_param.as_ref());
        if let Some(version) = &opts.version {
            fields.push(("version".into(), Value::String(version.clone())));
        }
        if opts.export_new_version {
            fields.push(("export_new_version".into(), Value::Bool(true)));
        }
        let data: JobData = data.into();
        let body = self.job_body(opts.content_type.as_deref(), &data, fields, opts.encrypt)?;

        let url = self.endpoint(&format!("v1/algorithms/{}/fit", path_segment(algorithm_id)));
        let outcome = self.execute(HttpRequest::new(Method::Post, url).body(body));
        match self.expect_json(outcome)? {
            Some(json) => self.map_task(&json),
            None => Ok(None),
        }
    }

    // ── Tasks ───────────────────────────────────────────────────────

    pub fn get_task_results(&mut self, task_id: &str) -> Result<Option<Task>, Error> {
        self.last_error = None;
        let url = self.endpoint(&format!("v1/algorithms/tasks/{}", path_segment(task_id)));
        let outcome = self.execute(HttpRequest::new(Method::Get, url));
        match self.expect_json(outcome)? {
            Some(json) => self.map_task(&json),
            None => Ok(None),
        }
    }

    /// Cancel a queued task and return its updated state.
    ///
    /// An acknowledgement without a task body is followed by a fresh fetch.
    pub fn cancel_task(&mut self, task_id: &str) -> Result<Option<Task>, Error> {
        self.last_error = None;
        let url = self.endpoint(&format!("v1/algorithms/tasks/{}", path_segment(task_id)));
        match self.execute(HttpRequest::new(Method::Delete, url)) {
            Outcome::JsonSuccess(json) if is_task_body(&json) => self.map_task(&json),
            Outcome::JsonSuccess(_) | Outcome::BinarySuccess { .. } => {
                debug!("cancel of task {} acknowledged without body, refetching", task_id);
                self.get_task_results(task_id)
            }
            Outcome::ClientFailure(env) | Outcome::ServerFailure(env) => self.fail(env),
        }
    }

    // ── Algorithms ──────────────────────────────────────────────────

    pub fn get_algorithms(&mut self) -> Result<Option<Vec<Algorithm>>, Error> {
        self.last_error = None;
        let url = self.endpoint("v1/algorithms");
        let outcome = self.execute(HttpRequest::new(Method::Get, url));
        match self.expect_json(outcome)? {
            Some(json) => self.map_list(json),
            None => Ok(None),
        }
    }

    pub fn get_algorithm(&mut self, algorithm_id: &str) -> Result<Option<Algorithm>, Error> {
        self.last_error = None;
        let url = self.endpoint(&format!("v1/algorithms/{}", path_segment(algorithm_id)));
        let outcome = self.execute(HttpRequest::new(Method::Get, url));
        match self.expect_json(outcome)? {
            Some(json) => self.map_one(&json),
            None => Ok(None),
        }
    }

    pub fn get_algorithm_versions(&mut self, algorithm_id: &str) -> Result<Option<Vec<Version>>, Error> {
        self.last_error = None;
        let url = self.endpoint(&format!("v1/algorithms/{}/versions", path_segment(algorithm_id)));
        let outcome = self.execute(HttpRequest::new(Method::Get, url));
        let Some(json) = self.expect_json(outcome)? else {
            return Ok(None);
        };
        Ok(self.map_list::<Version>(json)?.map(|versions| {
            versions
                .into_iter()
                .map(|mut v| {
                    v.algorithm_id.get_or_insert_with(|| algorithm_id.to_string());
                    v
                })
                .collect()
        }))
    }

    pub fn get_algorithm_version(&mut self, algorithm_id: &str, version: &str) -> Result<Option<Version>, Error> {
        self.last_error = None;
        let url = self.endpoint(&format!(
            "v1/algorithms/{}/versions/{}",
            path_segment(algorithm_id),
            path_segment(version)
        ));
        let outcome = self.execute(HttpRequest::new(Method::Get, url));
        let Some(json) = self.expect_json(outcome)? else {
            return Ok(None);
        };
        Ok(self.map_one::<Version>(&json)?.map(|mut v| {
            v.algorithm_id.get_or_insert_with(|| algorithm_id.to_string());
            v
        }))
    }

    // ── Artifacts ───────────────────────────────────────────────────

    /// Download the input/output template. The artifact is written and rewound.
    pub fn get_template(
        &mut self,
        algorithm_id: &str,
        file_type: FileType,
        version: Option<&str>,
    ) -> Result<Option<FileArtifact>, Error> {
        self.fetch_artifact(&format!("v1/algorithms/{}/template", path_segment(algorithm_id)), file_type, version)
    }

    /// Download the input/output graph. The artifact is written and rewound.
    pub fn get_graph(
        &mut self,
        algorithm_id: &str,
        file_type: FileType,
        version: Option<&str>,
    ) -> Result<Option<FileArtifact>, Error> {
        self.fetch_artifact(&format!("v1/algorithms/{}/graph", path_segment(algorithm_id)), file_type, version)
    }

    // ── Tokens ──────────────────────────────────────────────────────
    //
    // Token calls are explicit caller actions: failures always raise.

    pub fn generate_token(&mut self, username: &str, password: &str) -> Result<TokenPair, Error> {
        let request = TokenManager::login_request(&self.endpoint("v1/token/"), username, password);
        let outcome = self.send(&request);
        self.tokens.complete_login(outcome)
    }

    pub fn refresh_token(&mut self, refresh_token: &str) -> Result<String, Error> {
        let request = TokenManager::refresh_request(&self.endpoint("v1/token/refresh/"), refresh_token);
        self.tokens.begin_refresh();
        let outcome = self.send(&request);
        self.tokens.complete_refresh(refresh_token, outcome)
    }

    pub fn verify_token(&mut self, token: &str) -> Result<bool, Error> {
        let request = TokenManager::verify_request(&self.endpoint("v1/token/verify/"), token);
        let outcome = self.send(&request);
        self.tokens.complete_verify(token, outcome)
    }

    // ── Crypto ──────────────────────────────────────────────────────

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        crypto::encrypt(plaintext, self.require_keys()?.public_key())
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, Error> {
        let private = self
            .require_keys()?
            .private_key()
            .ok_or_else(|| Error::Crypto("configured key has no private half".into()))?;
        crypto::decrypt(blob, private)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn require_keys(&self) -> Result<&KeyMaterial, Error> {
        self.keys
            .as_ref()
            .ok_or_else(|| Error::Crypto("no key material configured".into()))
    }

    fn callback_fields(&self, url: Option<&CallbackUrls>, param: Option<&Value>) -> Vec<(String, Value)> {
        let mut fields = Vec::new();
        let url = url.cloned().map(set_callback_urls).or_else(|| self.callback_url.clone());
        if let Some(url) = url {
            fields.push(("callback_url".into(), Value::String(url)));
        }
        if let Some(param) = param {
            fields.push(("callback_param".into(), Value::String(encode_callback_params(param))));
        }
        fields
    }

    fn job_body(
        &self,
        content_type: Option<&str>,
        data: &JobData,
        fields: Vec<(String, Value)>,
        encrypt: bool,
    ) -> Result<RequestBody, Error> {
        let recipient = if encrypt {
            Some(self.require_keys()?.public_key())
        } else {
            None
        };
        build_job_body(content_type.unwrap_or(JSON_CONTENT_TYPE), data, fields, recipient)
    }

    /// Attach credentials, execute and classify. The request (and any
    /// temporary file it owns) is dropped before this returns.
    fn execute(&self, request: HttpRequest) -> Outcome {
        let request = self.tokens.authorize(request);
        self.send(&request)
    }

    fn send(&self, request: &HttpRequest) -> Outcome {
        debug!("{} {}", request.method.as_str(), request.url);
        match self.transport.execute(request) {
            Ok(raw) => classify_response(&raw),
            Err(e) => {
                debug!("transport error for {}: {}", request.url, e);
                from_transport_error(&e)
            }
        }
    }

    fn expect_json(&mut self, outcome: Outcome) -> Result<Option<Value>, Error> {
        match outcome {
            Outcome::JsonSuccess(json) => Ok(Some(json)),
            Outcome::BinarySuccess { content_type, .. } => self.fail(ErrorEnvelope::new(
                ErrorKind::Server,
                200,
                format!("unexpected content type '{}'", content_type),
            )),
            Outcome::ClientFailure(env) | Outcome::ServerFailure(env) => self.fail(env),
        }
    }

    /// Raise or record a remote failure.
    fn fail<R>(&mut self, envelope: ErrorEnvelope) -> Result<Option<R>, Error> {
        let err = Error::from(envelope);
        if self.fail_on_error {
            return Err(err);
        }
        warn!(
            "AI Core call failed (status {}): {}",
            err.status_code().unwrap_or_default(),
            err
        );
        self.last_error = Some(err);
        Ok(None)
    }

    fn map_failure<R>(&mut self, err: MapError, json: &Value) -> Result<Option<R>, Error> {
        match classify_map_error(err, &json.to_string()) {
            MapFailure::Raise(e) => Err(e),
            MapFailure::Remote(env) => self.fail(env),
        }
    }

    fn map_one<R: Mapped>(&mut self, json: &Value) -> Result<Option<R>, Error> {
        match map_typed::<R>(json) {
            Ok(resource) => Ok(Some(resource)),
            Err(e) => self.map_failure(e, json),
        }
    }

    /// A bare array, or a paginated object with a `results` array.
    fn map_list<R: Mapped>(&mut self, json: Value) -> Result<Option<Vec<R>>, Error> {
        let items = match &json {
            Value::Array(items) => Some(items),
            Value::Object(obj) => match obj.get("results") {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            },
            _ => None,
        };
        let Some(items) = items else {
            let err = MapError::InvalidData {
                resource: R::NAME.to_string(),
                message: "expected a list".into(),
            };
            return self.map_failure(err, &json);
        };
        match map_collection(R::NAME, items) {
            Ok(resources) => Ok(Some(resources.into_iter().filter_map(R::from_resource).collect())),
            Err(e) => self.map_failure(e, &json),
        }
    }

    fn map_task(&mut self, json: &Value) -> Result<Option<Task>, Error> {
        match self.map_one::<Task>(json)? {
            Some(task) => self.decrypt_task(task).map(Some),
            None => Ok(None),
        }
    }

    /// Decrypt a base64 result blob when the private key is at hand.
    /// Without one the task is returned as sent.
    fn decrypt_task(&self, mut task: Task) -> Result<Task, Error> {
        if !task.is_encrypted {
            return Ok(task);
        }
        let (Some(Value::String(encoded)), Some(private)) =
            (&task.result, self.keys.as_ref().and_then(KeyMaterial::private_key))
        else {
            return Ok(task);
        };
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("encrypted result is not base64: {}", e)))?;
        let plain = crypto::decrypt(&blob, private)?;
        task.result = Some(
            serde_json::from_slice(&plain)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&plain).into_owned())),
        );
        task.is_encrypted = false;
        Ok(task)
    }

    fn fetch_artifact(
        &mut self,
        path: &str,
        file_type: FileType,
        version: Option<&str>,
    ) -> Result<Option<FileArtifact>, Error> {
        self.last_error = None;

        let mut params = vec![("type", file_type.as_str())];
        if let Some(version) = version {
            params.push(("version", version));
        }
        let url = format!("{}{}", self.endpoint(path), build_get_args(params.as_slice()));

        match self.execute(HttpRequest::new(Method::Get, url)) {
            Outcome::BinarySuccess { content_type, bytes } => FileArtifact::write(&content_type, &bytes).map(Some),
            Outcome::JsonSuccess(json) => self.fail(
                ErrorEnvelope::new(ErrorKind::Server, 200, "expected a file artifact, got JSON")
                    .with_raw_body(json.to_string()),
            ),
            Outcome::ClientFailure(env) | Outcome::ServerFailure(env) => self.fail(env),
        }
    }
}

/// A queued job answers with a task reference, a training `job_id` or a bare
/// status. Synchronous predictions carry none of them.
fn is_task_body(json: &Value) -> bool {
    ["reference", "job_id", "status"].iter().any(|key| json.get(key).is_some())
}

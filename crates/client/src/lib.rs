//! AI Core API client.
//!
//! Submits prediction and training jobs, tracks tasks, reads algorithm
//! metadata and downloads template/graph artifacts from the COMPREDICT
//! AI Core service. Payloads can be encrypted end to end with the
//! configured RSA key.
//!
//! Blocking by design: one request per call, no background threads, no
//! async runtime. A [`Client`] carries mutable state (`last_error`, tokens)
//! and does no internal locking.
//!
//! ```no_run
//! use compredict_client::{Client, ClientConfig, RunOptions};
//! use serde_json::json;
//!
//! let mut client = Client::new(ClientConfig::with_api_key("0123456789abcdef0123456789abcdef01234567"))?;
//! client.set_fail_on_error(true);
//! if let Some(submission) = client.run_algorithm("mass_estimation", json!({"speed": [1, 2]}), &RunOptions::default())? {
//!     println!("{:?}", submission);
//! }
//! # Ok::<(), compredict_client::Error>(())
//! ```

mod client;
mod config;
mod crypto;
mod error;
mod request;
mod response;
mod token;
mod transport;

pub use client::{Client, FileType, RunOptions, Submission, TrainOptions};
pub use config::{config_file_path, ClientConfig, DEFAULT_API_BASE};
pub use crypto::{decrypt, encrypt, KeyMaterial, ENVELOPE_VERSION};
pub use error::{Error, ErrorEnvelope, ErrorKind};
pub use request::{
    build_get_args, encode_callback_params, path_segment, process_data, process_evaluate, set_callback_urls,
    CallbackUrls, FileArtifact, JobData, ProcessedData, JSON_CONTENT_TYPE, SUPPORTED_BINARY_TYPES,
};
pub use response::{classify, extract_error_message, Outcome};
pub use token::{AuthScheme, AuthState, TokenManager, TokenPair, API_KEY_LEN};
pub use transport::{HttpRequest, HttpTransport, Method, RawResponse, RequestBody, Transport, TransportError};

pub use compredict_protocol::{
    map_collection, map_resource, registered_names, Algorithm, MapError, Prediction, Resource, Task, TaskStatus,
    Version,
};

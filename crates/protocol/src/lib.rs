//! AI Core wire contract.
//!
//! This crate is the single source of truth for what the AI Core service
//! sends back: the response envelope, the typed resources (tasks,
//! algorithms, versions, synchronous predictions) and the closed registry
//! that maps a resource name onto its constructor.
//!
//! # Envelope
//!
//! Every JSON response is an object carrying an `error` flag. The flag is a
//! **string** (`"True"` / `"False"`), not a JSON boolean. The service is
//! external and fixed, so the literal strings are preserved end to end.
//!
//! ```ignore
//! use compredict_protocol::{map_typed, Task};
//!
//! let body: serde_json::Value = serde_json::from_str(&text)?;
//! let task: Task = map_typed(&body)?;
//! ```

pub mod mapper;
pub mod resources;

pub use mapper::{map_collection, map_resource, map_typed, registered_names, MapError, Mapped, Resource};
pub use resources::{Algorithm, Prediction, Task, TaskStatus, Version};

use serde_json::Value;

/// Name of the string-typed error flag in every response body.
pub const ERROR_FLAG_FIELD: &str = "error";

/// Literal flag value for a failed call.
pub const ERROR_TRUE: &str = "True";

/// Literal flag value for a successful call.
pub const ERROR_FALSE: &str = "False";

/// True when the body carries `"error": "True"`.
///
/// Anything else (missing field, `"False"`, a JSON boolean) is not treated
/// as an error flag.
pub fn is_error_flag_set(body: &Value) -> bool {
    body.get(ERROR_FLAG_FIELD).and_then(Value::as_str) == Some(ERROR_TRUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_flag_is_string_typed() {
        assert!(is_error_flag_set(&json!({"error": "True"})));
        assert!(!is_error_flag_set(&json!({"error": "False"})));
        // A boolean is not the wire contract
        assert!(!is_error_flag_set(&json!({"error": true})));
        assert!(!is_error_flag_set(&json!({"result": 1})));
    }
}

//! Typed resources returned by the AI Core API.
//!
//! Unknown JSON fields are ignored everywhere so server-side schema
//! additions never break an older client.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ── Task ────────────────────────────────────────────────────────────

/// Lifecycle of a submitted job.
///
/// Wire strings: `Pending`, `In Progress`, `Finished`, `Failed`, `Canceled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    /// A status string this client does not know yet.
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Queued => "Pending",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Finished",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Canceled",
            TaskStatus::Other(s) => s,
        }
    }

    /// Completed, failed and cancelled tasks never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => TaskStatus::Queued,
            "in progress" | "in_progress" | "running" => TaskStatus::InProgress,
            "finished" | "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "canceled" | "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Other(s),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Queued
    }
}

/// A submitted prediction or training job.
///
/// `reference` is the join key for every later status query and
/// cancellation. It is empty when the service answered with a bare status,
/// as some training acknowledgements do. A fresher status replaces the
/// whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, deserialize_with = "string_or_number")]
    pub reference: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Set by training submissions.
    #[serde(default, deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, alias = "results", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error description reported by the service for failed jobs.
    #[serde(default, rename = "error_msg", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl Task {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, TaskStatus::Queued | TaskStatus::InProgress)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

// ── Algorithm / Version ─────────────────────────────────────────────

/// One published version of an algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_description: Option<String>,
    #[serde(default, alias = "features_format", skip_serializing_if = "Option::is_none")]
    pub input_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// Owning algorithm. A back-reference by id, never ownership.
    #[serde(default, alias = "algorithm", deserialize_with = "opt_string_or_number", skip_serializing_if = "Option::is_none")]
    pub algorithm_id: Option<String>,
}

/// A computational capability offered by the service.
///
/// Built by the resource mapper, which routes every nested version through
/// the same registry and rejects duplicate version identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Algorithm {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub versions: Vec<Version>,
}

impl Algorithm {
    /// Look up a version by identifier.
    pub fn version(&self, version: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// The last version in server order.
    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.last()
    }
}

// ── Prediction ──────────────────────────────────────────────────────

/// Synchronous result of a run, returned when the service answers
/// immediately instead of queueing a task.
///
/// Every body field is kept: the known ones typed, the rest in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Literal `"True"` / `"False"` flag, kept as the service sends it.
    #[serde(default = "default_error_flag")]
    pub error: String,
    #[serde(default)]
    pub result: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_error_flag() -> String {
    crate::ERROR_FALSE.to_string()
}

// ── Serde helpers ───────────────────────────────────────────────────

/// Identifiers arrive as either JSON strings or numbers.
fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {}",
            other
        ))),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(de)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {}",
            other
        ))),
    }
}

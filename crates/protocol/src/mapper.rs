//! Resource mapper: decoded JSON to typed resources.
//!
//! The registry is closed: `Task`, `Algorithm`, `Version`. Asking for any
//! other name is a programmer error ([`MapError::UnknownResource`]) and is
//! kept distinct from bad payloads ([`MapError::InvalidData`]).

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::resources::{Algorithm, Task, Version};

/// A mapped resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Task(Task),
    Algorithm(Algorithm),
    Version(Version),
}

impl Resource {
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Task(_) => "Task",
            Resource::Algorithm(_) => "Algorithm",
            Resource::Version(_) => "Version",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapError {
    /// Resource name outside the registry.
    UnknownResource(String),
    /// Payload does not fit the resource.
    InvalidData { resource: String, message: String },
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownResource(name) => write!(f, "unknown resource kind '{}'", name),
            Self::InvalidData { resource, message } => write!(f, "invalid {} payload: {}", resource, message),
        }
    }
}

impl std::error::Error for MapError {}

type Constructor = fn(&Value) -> Result<Resource, MapError>;

const REGISTRY: &[(&str, Constructor)] = &[
    ("Task", build_task),
    ("Algorithm", build_algorithm),
    ("Version", build_version),
];

/// Names accepted by [`map_resource`].
pub fn registered_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Map one JSON object onto the resource registered under `name`.
pub fn map_resource(name: &str, object: &Value) -> Result<Resource, MapError> {
    let (_, construct) = REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .ok_or_else(|| MapError::UnknownResource(name.to_string()))?;
    construct(object)
}

/// Map every object in `objects`. The name is checked even for an empty slice.
pub fn map_collection(name: &str, objects: &[Value]) -> Result<Vec<Resource>, MapError> {
    if !registered_names().any(|n| n == name) {
        return Err(MapError::UnknownResource(name.to_string()));
    }
    objects.iter().map(|o| map_resource(name, o)).collect()
}

/// Resources that can be pulled back out of a [`Resource`].
pub trait Mapped: Sized {
    const NAME: &'static str;
    fn from_resource(resource: Resource) -> Option<Self>;
}

impl Mapped for Task {
    const NAME: &'static str = "Task";
    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::Task(t) => Some(t),
            _ => None,
        }
    }
}

impl Mapped for Algorithm {
    const NAME: &'static str = "Algorithm";
    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::Algorithm(a) => Some(a),
            _ => None,
        }
    }
}

impl Mapped for Version {
    const NAME: &'static str = "Version";
    fn from_resource(resource: Resource) -> Option<Self> {
        match resource {
            Resource::Version(v) => Some(v),
            _ => None,
        }
    }
}

/// Typed shortcut over [`map_resource`].
pub fn map_typed<R: Mapped>(object: &Value) -> Result<R, MapError> {
    let resource = map_resource(R::NAME, object)?;
    let found = resource.name();
    R::from_resource(resource).ok_or_else(|| MapError::InvalidData {
        resource: R::NAME.to_string(),
        message: format!("registry produced a {}", found),
    })
}

// ── Constructors ────────────────────────────────────────────────────

fn invalid(resource: &str, err: impl fmt::Display) -> MapError {
    MapError::InvalidData {
        resource: resource.to_string(),
        message: err.to_string(),
    }
}

fn build_task(object: &Value) -> Result<Resource, MapError> {
    Task::deserialize(object)
        .map(Resource::Task)
        .map_err(|e| invalid("Task", e))
}

fn build_version(object: &Value) -> Result<Resource, MapError> {
    Version::deserialize(object)
        .map(Resource::Version)
        .map_err(|e| invalid("Version", e))
}

/// Algorithm fields before the nested versions go through the registry.
#[derive(Deserialize)]
struct AlgorithmFields {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    versions: Vec<Value>,
}

fn id_string<'de, D: serde::Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, found {}", other))),
    }
}

fn build_algorithm(object: &Value) -> Result<Resource, MapError> {
    let fields = AlgorithmFields::deserialize(object).map_err(|e| invalid("Algorithm", e))?;

    let mut seen = HashSet::new();
    let mut versions = Vec::with_capacity(fields.versions.len());
    for resource in map_collection("Version", &fields.versions)? {
        let Some(mut version) = Version::from_resource(resource) else {
            return Err(invalid("Algorithm", "nested version did not map to a Version"));
        };
        if !seen.insert(version.version.clone()) {
            return Err(invalid(
                "Algorithm",
                format!("duplicate version '{}' in algorithm '{}'", version.version, fields.id),
            ));
        }
        version.algorithm_id = Some(fields.id.clone());
        versions.push(version);
    }

    Ok(Resource::Algorithm(Algorithm {
        id: fields.id,
        name: fields.name,
        description: fields.description,
        kind: fields.kind,
        versions,
    }))
}

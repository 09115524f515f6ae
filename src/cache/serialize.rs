//! Serialization Guard Module
//!
//! Reduces handler results to plain JSON before they are persisted.
//! Members that carry hydration or bookkeeping state (`__v`, `$__`,
//! `$isNew`, ...) are dropped, and extended-JSON wrappers collapse to
//! their plain values: `{"$oid": "..."}` becomes the hex string and
//! `{"$date": x}` becomes `x`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

const OBJECT_ID_WRAPPER: &str = "$oid";
const DATE_WRAPPER: &str = "$date";

// == Serialization Error ==
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("value cannot be reduced to plain data: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("stored value is not valid plain data: {0}")]
    Decode(#[source] serde_json::Error),
}

// == Snapshot ==
/// A handler result that may be cached.
///
/// `Ok(None)` means the result is fine to return but must not be stored,
/// e.g. an error response.
pub trait Snapshot {
    fn plain_data(&self) -> Result<Option<Value>, SerializationError>;
}

impl<T: Serialize, E> Snapshot for Result<T, E> {
    fn plain_data(&self) -> Result<Option<Value>, SerializationError> {
        match self {
            Ok(value) => serde_json::to_value(value)
                .map(Some)
                .map_err(SerializationError::Encode),
            Err(_) => Ok(None),
        }
    }
}

// == Serialization Guard ==
#[derive(Debug, Clone)]
pub struct SerializationGuard {
    internal_prefixes: Vec<String>,
}

impl Default for SerializationGuard {
    fn default() -> Self {
        Self {
            internal_prefixes: vec!["$".to_string(), "__".to_string()],
        }
    }
}

impl SerializationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds another member-name prefix to strip.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.internal_prefixes.push(prefix.into());
        self
    }

    fn is_internal(&self, name: &str) -> bool {
        self.internal_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Serializes `value` and sanitizes the result.
    pub fn snapshot<T: Serialize + ?Sized>(&self, value: &T) -> Result<Value, SerializationError> {
        let value = serde_json::to_value(value).map_err(SerializationError::Encode)?;
        Ok(self.sanitize(value))
    }

    /// Strips internal members and collapses identifier wrappers.
    pub fn sanitize(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => self.sanitize_object(map),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.sanitize(v)).collect()),
            other => other,
        }
    }

    fn sanitize_object(&self, mut map: Map<String, Value>) -> Value {
        if map.len() == 1 {
            if let Some(Value::String(id)) = map.get(OBJECT_ID_WRAPPER) {
                return Value::String(id.clone());
            }
            if let Some(date) = map.remove(DATE_WRAPPER) {
                return self.sanitize(date);
            }
        }
        Value::Object(
            map.into_iter()
                .filter(|(name, _)| !self.is_internal(name))
                .map(|(name, value)| (name, self.sanitize(value)))
                .collect(),
        )
    }

    /// Compact bytes for storage.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(value).map_err(SerializationError::Encode)
    }

    /// Parses stored bytes back into plain data.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        serde_json::from_slice(bytes).map_err(SerializationError::Decode)
    }

    /// Snapshot and encode in one step.
    pub fn to_bytes<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        self.encode(&self.snapshot(value)?)
    }

    /// Decodes stored bytes into a typed value.
    pub fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(SerializationError::Decode)
    }
}

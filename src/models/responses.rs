//! Response DTOs for the health and sample resource APIs
//!
//! Admin payloads are the cache module's own serializable types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::BackendKind;
use crate::cache::BackendHealth;

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Process status, always "healthy" when the server answers
    pub status: String,
    /// Cache backend status
    pub cache: CacheHealth,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub status: BackendHealth,
    pub backend: BackendKind,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(cache: BackendHealth, backend: BackendKind) -> Self {
        Self {
            status: "healthy".to_string(),
            cache: CacheHealth {
                status: cache,
                backend,
            },
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// A sample resource record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy(BackendHealth::Disabled, BackendKind::None);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("\"disabled\""));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_event_serialize_camel_case() {
        let now = Utc::now();
        let event = Event {
            id: "64f1a2b3c4d5e6f708192a3b".into(),
            title: "Launch".into(),
            venue: None,
            starts_at: now,
            tags: vec![],
            updated_at: now,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("startsAt"));
        assert!(!json.contains("venue"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("Something went wrong"));
    }
}

//! Request DTOs for the admin and sample resource APIs
//!
//! Defines the structure of incoming query strings and bodies.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cache::{PurgeOptions, DEFAULT_BATCH_SIZE};

/// Query for `GET /admin/cache/keys`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysQuery {
    /// Key prefix; the configured namespace when absent
    pub prefix: Option<String>,
    /// Cursor from the previous page
    pub cursor: Option<String>,
    /// Page size hint
    pub count: Option<usize>,
}

/// Query for `GET /admin/cache/value`
#[derive(Debug, Clone, Deserialize)]
pub struct ValueQuery {
    pub key: String,
}

/// Body for `POST /admin/cache/purge`
///
/// # Fields
/// - `prefix`: Literal key prefix; a trailing `*` is optional
/// - `dryRun`: Count matches without deleting
/// - `batch`: Scan page and delete batch size
/// - `limit`: Most keys to delete in this call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    pub prefix: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub batch: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PurgeRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.prefix.trim().is_empty() {
            return Some("Prefix cannot be empty".to_string());
        }
        if self.prefix.trim_end_matches('*').is_empty() {
            return Some("Prefix must not match the whole keyspace".to_string());
        }
        if self.batch == Some(0) {
            return Some("Batch must be at least 1".to_string());
        }
        None
    }

    pub fn options(&self) -> PurgeOptions {
        PurgeOptions {
            dry_run: self.dry_run,
            batch_size: self.batch.unwrap_or(DEFAULT_BATCH_SIZE),
            limit: self.limit,
        }
    }
}

/// Body for creating or replacing an event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub title: String,
    #[serde(default)]
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EventInput {
    pub fn validate(&self) -> Option<String> {
        if self.title.trim().is_empty() {
            return Some("Title cannot be empty".to_string());
        }
        if self.title.len() > 200 {
            return Some("Title exceeds maximum length of 200 characters".to_string());
        }
        None
    }
}

/// Query for `GET /events`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventListQuery {
    /// Only events carrying this tag
    pub tag: Option<String>,
    /// Maximum number of events returned
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_request_deserialize() {
        let json = r#"{"prefix": "ns:prod:http:GET:events*", "dryRun": true, "batch": 50}"#;
        let req: PurgeRequest = serde_json::from_str(json).unwrap();
        assert!(req.dry_run);
        assert_eq!(req.batch, Some(50));
        assert!(req.limit.is_none());

        let options = req.options();
        assert!(options.dry_run);
        assert_eq!(options.batch_size, 50);
    }

    #[test]
    fn test_purge_request_defaults() {
        let req: PurgeRequest = serde_json::from_str(r#"{"prefix": "ns"}"#).unwrap();
        assert!(!req.dry_run);
        assert_eq!(req.options().batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_purge_request_validation() {
        let mut req: PurgeRequest = serde_json::from_str(r#"{"prefix": "ns"}"#).unwrap();
        assert!(req.validate().is_none());

        req.prefix = "".into();
        assert!(req.validate().is_some());

        req.prefix = "*".into();
        assert!(req.validate().is_some());

        req.prefix = "ns".into();
        req.batch = Some(0);
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_event_input_deserialize() {
        let json = r#"{"title": "Launch", "startsAt": "2024-05-01T10:00:00Z"}"#;
        let input: EventInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.title, "Launch");
        assert!(input.tags.is_empty());
        assert!(input.validate().is_none());
    }

    #[test]
    fn test_event_input_blank_title() {
        let json = r#"{"title": "  ", "startsAt": "2024-05-01T10:00:00Z"}"#;
        let input: EventInput = serde_json::from_str(json).unwrap();
        assert!(input.validate().is_some());
    }
}

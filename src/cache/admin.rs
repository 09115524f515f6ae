//! Admin Inspection/Purge Service
//!
//! Read-mostly operations for operators. A backend outage shows up as a
//! degraded status in the payloads, never as an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::adapter::CacheAdapter;
use super::health::BackendHealth;
use super::invalidate::{Invalidator, PurgeError, PurgeOptions, PurgeReport};
use super::keys::KeyBuilder;
use super::stats::{CacheStats, StatsSnapshot};
use crate::backend::{prefix_pattern, BackendKind, SCAN_START};

/// Default page size for key listings.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Largest accepted page size for key listings.
pub const MAX_PAGE_SIZE: usize = 1000;

// == Payloads ==
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub status: BackendHealth,
    pub backend: BackendKind,
    pub reachable: bool,
    /// Approximate number of keys in the backend, absent when unreachable
    pub key_count: Option<u64>,
    pub prefix: String,
    pub environment: String,
    pub default_ttl_ms: u64,
    pub stats: StatsSnapshot,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPage {
    pub pattern: String,
    pub keys: Vec<String>,
    /// Pass back to continue; `"0"` once the iteration is done
    pub cursor: String,
    pub complete: bool,
    pub status: BackendHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Json,
    Text,
    Binary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfo {
    pub key: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    pub status: BackendHealth,
}

impl ValueInfo {
    fn absent(key: &str, status: BackendHealth) -> Self {
        Self {
            key: key.to_string(),
            exists: false,
            kind: None,
            value: None,
            size: None,
            ttl_ms: None,
            status,
        }
    }
}

/// Classifies raw bytes and renders them for display.
pub fn inspect_value(bytes: &[u8]) -> (ValueKind, Value) {
    if let Ok(json) = serde_json::from_slice::<Value>(bytes) {
        return (ValueKind::Json, json);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (ValueKind::Text, Value::String(text.to_string())),
        Err(_) => (
            ValueKind::Binary,
            Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ),
    }
}

// == Admin Service ==
#[derive(Clone)]
pub struct AdminService {
    adapter: CacheAdapter,
    invalidator: Invalidator,
    keys: KeyBuilder,
    default_ttl: Duration,
    stats: Arc<CacheStats>,
}

impl AdminService {
    pub fn new(
        adapter: CacheAdapter,
        invalidator: Invalidator,
        keys: KeyBuilder,
        default_ttl: Duration,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            adapter,
            invalidator,
            keys,
            default_ttl,
            stats,
        }
    }

    // == Info ==
    /// Reachability, approximate key count and namespace settings.
    pub async fn info(&self) -> CacheInfo {
        let reachable = self.adapter.ping().await;
        let key_count = if reachable {
            self.adapter.key_count().await
        } else {
            None
        };

        CacheInfo {
            status: self.adapter.health(),
            backend: self.adapter.kind(),
            reachable,
            key_count,
            prefix: self.keys.prefix().to_string(),
            environment: self.keys.environment().to_string(),
            default_ttl_ms: self.default_ttl.as_millis() as u64,
            stats: self.stats.snapshot(),
            checked_at: Utc::now(),
        }
    }

    // == List Keys ==
    /// One page of keys under `prefix` (the whole namespace by default).
    ///
    /// # Arguments
    /// * `prefix` - Literal key prefix; a trailing `*` is optional
    /// * `cursor` - Cursor from the previous page, `"0"` to start
    /// * `count` - Page size hint, clamped to 1..=1000
    pub async fn list_keys(
        &self,
        prefix: Option<&str>,
        cursor: Option<&str>,
        count: Option<usize>,
    ) -> KeyPage {
        let pattern = match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => prefix_pattern(prefix),
            None => self.keys.namespace_pattern(),
        };
        let cursor = cursor.filter(|c| !c.is_empty()).unwrap_or(SCAN_START);
        let count = count.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        match self.adapter.scan(&pattern, cursor, count).await {
            Some(page) => KeyPage {
                complete: page.is_exhausted(),
                pattern,
                keys: page.keys,
                cursor: page.cursor,
                status: self.adapter.health(),
            },
            None => KeyPage {
                pattern,
                keys: Vec::new(),
                cursor: SCAN_START.to_string(),
                complete: false,
                status: self.adapter.health(),
            },
        }
    }

    // == Get Value ==
    /// Raw value, inferred type and remaining TTL. Absent keys are a
    /// normal result.
    pub async fn get_value(&self, key: &str) -> ValueInfo {
        let Some(bytes) = self.adapter.get(key).await else {
            return ValueInfo::absent(key, self.adapter.health());
        };
        let ttl = self.adapter.ttl_remaining(key).await;
        let (kind, value) = inspect_value(&bytes);

        ValueInfo {
            key: key.to_string(),
            exists: true,
            kind: Some(kind),
            value: Some(value),
            size: Some(bytes.len()),
            ttl_ms: ttl.map(|t| t.as_millis() as u64),
            status: self.adapter.health(),
        }
    }

    // == Purge ==
    pub async fn purge(&self, prefix: &str, options: PurgeOptions) -> Result<PurgeReport, PurgeError> {
        self.invalidator.delete_by_prefix(prefix, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::adapter::tests::{memory_adapter, FailingBackend};
    use serde_json::json;

    fn service(adapter: CacheAdapter) -> AdminService {
        let keys = KeyBuilder::new("ns", "test").unwrap();
        let invalidator = Invalidator::new(adapter.clone(), keys.clone(), 1000);
        AdminService::new(
            adapter,
            invalidator,
            keys,
            Duration::from_secs(60),
            Arc::new(CacheStats::new()),
        )
    }

    #[tokio::test]
    async fn test_info_reports_connected_backend() {
        let adapter = memory_adapter();
        adapter.set("ns:test:a", b"1", Duration::from_secs(60)).await;
        let info = service(adapter).info().await;

        assert!(info.reachable);
        assert_eq!(info.status, BackendHealth::Connected);
        assert_eq!(info.backend, BackendKind::Memory);
        assert_eq!(info.key_count, Some(1));
        assert_eq!(info.prefix, "ns");
        assert_eq!(info.default_ttl_ms, 60_000);
    }

    #[tokio::test]
    async fn test_info_degrades_when_unreachable() {
        let adapter = CacheAdapter::new(Arc::new(FailingBackend), Duration::from_millis(50));
        let info = service(adapter).info().await;
        assert!(!info.reachable);
        assert_eq!(info.status, BackendHealth::Down);
        assert_eq!(info.key_count, None);
    }

    #[tokio::test]
    async fn test_info_disabled_backend() {
        let info = service(CacheAdapter::disabled()).info().await;
        assert_eq!(info.status, BackendHealth::Disabled);
        assert_eq!(info.backend, BackendKind::None);
        assert!(!info.reachable);
    }

    #[tokio::test]
    async fn test_list_keys_pages_through_namespace() {
        let adapter = memory_adapter();
        for i in 0..25 {
            adapter.set(&format!("ns:test:k{i:02}"), b"1", Duration::from_secs(60)).await;
        }
        adapter.set("other:key", b"1", Duration::from_secs(60)).await;
        let service = service(adapter);

        let mut cursor = SCAN_START.to_string();
        let mut seen = Vec::new();
        loop {
            let page = service.list_keys(None, Some(&cursor), Some(10)).await;
            assert_eq!(page.pattern, "ns:test:*");
            seen.extend(page.keys);
            if page.complete {
                break;
            }
            cursor = page.cursor;
        }
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn test_list_keys_on_failing_backend() {
        let adapter = CacheAdapter::new(Arc::new(FailingBackend), Duration::from_millis(50));
        let page = service(adapter).list_keys(Some("ns"), None, None).await;
        assert!(page.keys.is_empty());
        assert_eq!(page.status, BackendHealth::Down);
    }

    #[tokio::test]
    async fn test_get_value_kinds() {
        let adapter = memory_adapter();
        adapter.set("json", br#"{"a":1}"#, Duration::from_secs(60)).await;
        adapter.set("text", b"hello", Duration::from_secs(60)).await;
        adapter.set("bin", &[0xff, 0xfe, 0x00], Duration::from_secs(60)).await;
        let service = service(adapter);

        let json_value = service.get_value("json").await;
        assert!(json_value.exists);
        assert_eq!(json_value.kind, Some(ValueKind::Json));
        assert_eq!(json_value.value, Some(json!({"a": 1})));
        assert!(json_value.ttl_ms.unwrap() <= 60_000);

        assert_eq!(service.get_value("text").await.kind, Some(ValueKind::Text));
        assert_eq!(service.get_value("bin").await.kind, Some(ValueKind::Binary));
    }

    #[tokio::test]
    async fn test_get_missing_value() {
        let info = service(memory_adapter()).get_value("nope").await;
        assert!(!info.exists);
        assert!(info.kind.is_none());
    }

    #[tokio::test]
    async fn test_purge_delegates() {
        let adapter = memory_adapter();
        adapter.set("ns:test:http:GET:events?a", b"1", Duration::from_secs(60)).await;
        let service = service(adapter);

        let dry = service
            .purge("ns:test:http:GET:events", PurgeOptions { dry_run: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(dry.matched, 1);
        assert!(service.get_value("ns:test:http:GET:events?a").await.exists);

        let real = service
            .purge("ns:test:http:GET:events", PurgeOptions::default())
            .await
            .unwrap();
        assert_eq!(real.deleted, 1);
        assert!(!service.get_value("ns:test:http:GET:events?a").await.exists);
    }
}

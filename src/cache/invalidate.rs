//! Invalidation Helper Module
//!
//! Used by write paths after a successful mutation, and by the admin purge.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::adapter::CacheAdapter;
use super::keys::KeyBuilder;
use crate::backend::{prefix_pattern, SCAN_START};

/// Default scan page and delete batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 1000;
/// Keys returned by a dry run.
pub const DRY_RUN_SAMPLE: usize = 100;

// == Purge Error ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurgeError {
    #[error(
        "purge matches more than {ceiling} keys; pass an explicit limit or run a dry run first"
    )]
    OverLimit { matched: u64, ceiling: usize },
}

// == Purge Options ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Count matches without deleting
    pub dry_run: bool,
    /// Scan page size and delete batch size
    pub batch_size: usize,
    /// Upper bound on keys touched by this call
    pub limit: Option<usize>,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            limit: None,
        }
    }
}

// == Purge Report ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub pattern: String,
    pub dry_run: bool,
    /// Keys matched (counted on a dry run, deleted otherwise)
    pub matched: u64,
    /// Keys the backend reported as removed
    pub deleted: u64,
    /// The whole keyspace was walked without hitting the limit or a failure
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Vec<String>>,
}

// == Invalidator ==
#[derive(Clone)]
pub struct Invalidator {
    adapter: CacheAdapter,
    keys: KeyBuilder,
    ceiling: usize,
}

impl Invalidator {
    /// # Arguments
    /// * `adapter` - Backend façade
    /// * `keys` - Key builder writers use to compute exact keys
    /// * `ceiling` - Most keys an unbounded purge may delete
    pub fn new(adapter: CacheAdapter, keys: KeyBuilder, ceiling: usize) -> Self {
        Self {
            adapter,
            keys,
            ceiling,
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Deletes one key. Failures are logged by the adapter and ignored.
    pub async fn delete(&self, key: &str) -> u64 {
        let removed = self.adapter.delete(key).await;
        debug!(cache = "invalidate", key, removed, "key invalidated");
        removed
    }

    /// Deletes, or counts on a dry run, every key starting with `prefix`.
    ///
    /// The prefix matches literally, glob characters included. Without an
    /// explicit limit, a destructive call first counts matches and refuses
    /// to run when they exceed the configured ceiling.
    pub async fn delete_by_prefix(
        &self,
        prefix: &str,
        options: PurgeOptions,
    ) -> Result<PurgeReport, PurgeError> {
        let pattern = prefix_pattern(prefix);
        let batch = options.batch_size.clamp(1, MAX_BATCH_SIZE);

        if options.dry_run {
            return Ok(self.count_matches(&pattern, batch, options.limit, DRY_RUN_SAMPLE).await);
        }

        let limit = match options.limit {
            Some(limit) => limit,
            None => {
                let preview = self
                    .count_matches(&pattern, batch, Some(self.ceiling.saturating_add(1)), 0)
                    .await;
                if preview.matched > self.ceiling as u64 {
                    return Err(PurgeError::OverLimit {
                        matched: preview.matched,
                        ceiling: self.ceiling,
                    });
                }
                self.ceiling
            }
        };

        let report = self.delete_matches(&pattern, batch, limit).await;
        info!(
            pattern = %report.pattern,
            matched = report.matched,
            deleted = report.deleted,
            complete = report.complete,
            "cache purge finished"
        );
        Ok(report)
    }

    async fn count_matches(
        &self,
        pattern: &str,
        batch: usize,
        limit: Option<usize>,
        sample_size: usize,
    ) -> PurgeReport {
        let limit = limit.unwrap_or(usize::MAX);
        let mut cursor = SCAN_START.to_string();
        let mut matched = 0usize;
        let mut sample = Vec::new();
        let mut complete = false;

        'scan: loop {
            let Some(page) = self.adapter.scan(pattern, &cursor, batch).await else {
                break;
            };
            for key in page.keys {
                if matched >= limit {
                    break 'scan;
                }
                matched += 1;
                if sample.len() < sample_size {
                    sample.push(key);
                }
            }
            if page.cursor == SCAN_START {
                complete = true;
                break;
            }
            cursor = page.cursor;
        }

        PurgeReport {
            pattern: pattern.to_string(),
            dry_run: true,
            matched: matched as u64,
            deleted: 0,
            complete,
            sample: (sample_size > 0).then_some(sample),
        }
    }

    async fn delete_matches(&self, pattern: &str, batch: usize, limit: usize) -> PurgeReport {
        let mut cursor = SCAN_START.to_string();
        let mut pending: Vec<String> = Vec::with_capacity(batch);
        let mut matched = 0usize;
        let mut deleted = 0u64;
        let mut complete = false;

        'scan: loop {
            let Some(page) = self.adapter.scan(pattern, &cursor, batch).await else {
                break;
            };
            for key in page.keys {
                if matched >= limit {
                    break 'scan;
                }
                matched += 1;
                pending.push(key);
                if pending.len() >= batch {
                    deleted += self.adapter.delete_many(&pending).await;
                    pending.clear();
                }
            }
            if page.cursor == SCAN_START {
                complete = true;
                break;
            }
            cursor = page.cursor;
        }
        deleted += self.adapter.delete_many(&pending).await;

        PurgeReport {
            pattern: pattern.to_string(),
            dry_run: false,
            matched: matched as u64,
            deleted,
            complete,
            sample: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::adapter::tests::{memory_adapter, FailingBackend};
    use axum::http::Method;
    use std::sync::Arc;
    use std::time::Duration;

    async fn seeded(count: usize) -> Invalidator {
        let adapter = memory_adapter();
        for i in 0..count {
            adapter
                .set(&format!("ns:test:http:GET:events?page={i:05}"), b"[]", Duration::from_secs(60))
                .await;
        }
        adapter
            .set("ns:test:http:GET:other?", b"[]", Duration::from_secs(60))
            .await;
        Invalidator::new(adapter, KeyBuilder::new("ns", "test").unwrap(), 1000)
    }

    async fn remaining(invalidator: &Invalidator, prefix: &str) -> u64 {
        let report = invalidator
            .delete_by_prefix(prefix, PurgeOptions { dry_run: true, ..Default::default() })
            .await
            .unwrap();
        report.matched
    }

    #[tokio::test]
    async fn test_single_key_delete() {
        let invalidator = seeded(1).await;
        let key = "ns:test:http:GET:events?page=00000";
        assert_eq!(invalidator.delete(key).await, 1);
        assert_eq!(invalidator.adapter.get(key).await, None);
        assert_eq!(invalidator.delete(key).await, 0);
    }

    #[tokio::test]
    async fn test_dry_run_is_non_destructive() {
        let invalidator = seeded(150).await;
        let report = invalidator
            .delete_by_prefix("ns:test:http:GET:events", PurgeOptions { dry_run: true, ..Default::default() })
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.matched, 150);
        assert_eq!(report.deleted, 0);
        assert!(report.complete);
        assert_eq!(report.sample.as_ref().map(Vec::len), Some(DRY_RUN_SAMPLE));
        assert_eq!(remaining(&invalidator, "ns:test:http:GET:events").await, 150);
    }

    #[tokio::test]
    async fn test_limit_caps_each_call() {
        let invalidator = seeded(1200).await;
        let options = PurgeOptions {
            limit: Some(500),
            ..Default::default()
        };

        let first = invalidator.delete_by_prefix("ns:test:http:GET:events*", options).await.unwrap();
        assert_eq!(first.deleted, 500);
        assert!(!first.complete);
        assert_eq!(remaining(&invalidator, "ns:test:http:GET:events").await, 700);

        let second = invalidator.delete_by_prefix("ns:test:http:GET:events*", options).await.unwrap();
        assert_eq!(second.deleted, 500);
        let third = invalidator.delete_by_prefix("ns:test:http:GET:events*", options).await.unwrap();
        assert_eq!(third.deleted, 200);
        assert!(third.complete);

        assert_eq!(remaining(&invalidator, "ns:test:http:GET:events").await, 0);
        assert_eq!(remaining(&invalidator, "ns:test:http:GET:other").await, 1);
    }

    #[tokio::test]
    async fn test_unbounded_purge_over_ceiling_is_rejected() {
        let invalidator = seeded(1001).await;
        let err = invalidator
            .delete_by_prefix("ns:test:http:GET:events", PurgeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, PurgeError::OverLimit { matched: 1001, ceiling: 1000 });
        assert_eq!(remaining(&invalidator, "ns:test:http:GET:events").await, 1001);
    }

    #[tokio::test]
    async fn test_unbounded_purge_under_ceiling() {
        let invalidator = seeded(40).await;
        let report = invalidator
            .delete_by_prefix("ns:test:http:GET:events", PurgeOptions { batch_size: 7, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(report.deleted, 40);
        assert!(report.complete);
    }

    #[tokio::test]
    async fn test_route_family_purge() {
        let invalidator = seeded(3).await;
        invalidator
            .adapter
            .set("ns:test:http:GET:/events?", b"[]", Duration::from_secs(60))
            .await;
        invalidator
            .adapter
            .set("ns:test:http:GET:/events?tag=x", b"[]", Duration::from_secs(60))
            .await;
        invalidator
            .adapter
            .set("ns:test:http:GET:/events/abc?", b"{}", Duration::from_secs(60))
            .await;

        let family = invalidator.keys().route_family_prefix(&Method::GET, "/events");
        let report = invalidator
            .delete_by_prefix(&family, PurgeOptions::default())
            .await
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert!(invalidator.adapter.get("ns:test:http:GET:/events/abc?").await.is_some());
    }

    #[tokio::test]
    async fn test_prefix_question_mark_is_literal() {
        let invalidator = seeded(0).await;
        for key in ["ns:test:http:GET:/events?page=1", "ns:test:http:GET:/events/page=1?"] {
            invalidator.adapter.set(key, b"[]", Duration::from_secs(60)).await;
        }

        let preview = invalidator
            .delete_by_prefix(
                "ns:test:http:GET:/events?page=1",
                PurgeOptions { dry_run: true, ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(preview.matched, 1);
        assert_eq!(
            preview.sample,
            Some(vec!["ns:test:http:GET:/events?page=1".to_string()])
        );

        let report = invalidator
            .delete_by_prefix("ns:test:http:GET:/events?page=1", PurgeOptions::default())
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert!(invalidator
            .adapter
            .get("ns:test:http:GET:/events/page=1?")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_backend_failure_reports_incomplete() {
        let adapter = CacheAdapter::new(Arc::new(FailingBackend), Duration::from_millis(50));
        let invalidator = Invalidator::new(adapter, KeyBuilder::new("ns", "test").unwrap(), 10);
        let report = invalidator
            .delete_by_prefix("ns:test", PurgeOptions { limit: Some(5), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(report.matched, 0);
        assert!(!report.complete);
        assert_eq!(invalidator.delete("ns:test:x").await, 0);
    }
}

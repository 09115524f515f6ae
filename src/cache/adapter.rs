//! Cache Adapter Module
//!
//! The single surface every other component uses to reach the backend.
//! Operations never fail: backend errors and timeouts are logged, flip the
//! shared health status to down, and degrade to an empty result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use super::health::{BackendHealth, HealthStatus};
use crate::backend::{BackendKind, BackendResult, CacheBackend, NoopBackend, ScanPage};

// == Cache Adapter ==
/// Infallible wrapper around the selected backend.
#[derive(Clone)]
pub struct CacheAdapter {
    backend: Arc<dyn CacheBackend>,
    health: HealthStatus,
    op_timeout: Duration,
}

impl CacheAdapter {
    // == Constructor ==
    /// Wraps a backend with a per-operation timeout.
    ///
    /// # Arguments
    /// * `backend` - The backend selected at start-up
    /// * `op_timeout` - Upper bound for every individual operation
    pub fn new(backend: Arc<dyn CacheBackend>, op_timeout: Duration) -> Self {
        let health = HealthStatus::for_backend(backend.kind());
        Self {
            backend,
            health,
            op_timeout,
        }
    }

    /// An adapter over the no-op backend.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopBackend), Duration::from_millis(1))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn health(&self) -> BackendHealth {
        self.health.get()
    }

    pub fn is_enabled(&self) -> bool {
        self.health.get() != BackendHealth::Disabled
    }

    // == Read Operations ==
    /// Fetches a raw value. Missing keys and failures both read as `None`.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.run("get", self.op_timeout, self.backend.get(key))
            .await
            .flatten()
    }

    /// Remaining time to live of a key, if it exists and expires.
    pub async fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        self.run("ttl", self.op_timeout, self.backend.ttl_remaining(key))
            .await
            .flatten()
    }

    /// Fetches one page of keys matching `pattern`.
    ///
    /// Returns `None` when the backend could not be reached, so callers
    /// can tell a failed scan from an empty keyspace.
    pub async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> Option<ScanPage> {
        self.run(
            "scan",
            self.op_timeout,
            self.backend.scan(pattern, cursor, count),
        )
        .await
    }

    /// Number of keys held by the backend, when it can be determined.
    pub async fn key_count(&self) -> Option<u64> {
        self.run("key_count", self.op_timeout, self.backend.key_count())
            .await
    }

    // == Write Operations ==
    /// Stores a value. Returns whether the write was acknowledged.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        self.run("set", self.op_timeout, self.backend.set(key, value, ttl))
            .await
            .is_some()
    }

    /// Removes a single key, returning how many keys were removed.
    pub async fn delete(&self, key: &str) -> u64 {
        self.delete_many(&[key.to_string()]).await
    }

    /// Removes a batch of keys, returning how many keys were removed.
    pub async fn delete_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        self.run("delete", self.op_timeout, self.backend.delete(keys))
            .await
            .unwrap_or(0)
    }

    // == Liveness ==
    /// Pings the backend within the operation timeout.
    pub async fn ping(&self) -> bool {
        self.probe(self.op_timeout).await == BackendHealth::Connected
    }

    /// Pings the backend with an explicit deadline and returns the
    /// resulting health.
    pub async fn probe(&self, deadline: Duration) -> BackendHealth {
        if !self.is_enabled() {
            return BackendHealth::Disabled;
        }
        self.run("ping", deadline, self.backend.ping()).await;
        self.health.get()
    }

    async fn run<T, F>(&self, op: &'static str, deadline: Duration, fut: F) -> Option<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        match timeout(deadline, fut).await {
            Ok(Ok(value)) => {
                if self.health.mark_connected() {
                    info!(backend = self.kind().as_str(), "cache backend connected");
                }
                Some(value)
            }
            Ok(Err(err)) => {
                warn!(op, backend = self.kind().as_str(), error = %err, "cache operation failed");
                self.mark_down();
                None
            }
            Err(_) => {
                warn!(
                    op,
                    backend = self.kind().as_str(),
                    timeout_ms = deadline.as_millis() as u64,
                    "cache operation timed out"
                );
                self.mark_down();
                None
            }
        }
    }

    fn mark_down(&self) {
        if self.health.mark_down() {
            warn!(backend = self.kind().as_str(), "cache backend marked down");
        }
    }
}

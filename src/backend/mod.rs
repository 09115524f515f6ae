//! Backend Module
//!
//! Raw access to the key/value store holding cached responses. Every
//! realization implements [`CacheBackend`]; failures are returned to the
//! caller and are only swallowed one layer up, in the cache adapter.

mod cluster;
mod connect;
mod factory;
mod memory;
mod noop;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use cluster::{key_slot, RedisClusterBackend};
pub use connect::{AddressMap, Dialer, NodeAddr, TlsOptions};
pub use factory::{build_backend, SelectedBackend};
pub use memory::MemoryBackend;
pub use noop::NoopBackend;
pub use redis::RedisBackend;

// == Public Constants ==
/// Cursor value that starts a scan and signals its exhaustion.
pub const SCAN_START: &str = "0";

// == Backend Error ==
/// Failures raised by a backend realization.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The store answered with an error or the protocol broke down
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Socket level failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation did not finish within its time budget
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// TLS material could not be loaded or the server name is invalid
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// The backend configuration is unusable
    #[error("invalid backend configuration: {0}")]
    Config(String),

    /// Cluster topology could not be resolved
    #[error("cluster topology error: {0}")]
    Cluster(String),

    /// A memory backend pattern could not be compiled
    #[error("invalid scan pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Convenience Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

// == Backend Kind ==
/// Which realization sits behind the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    None,
    Memory,
    Standalone,
    Cluster,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::Memory => "memory",
            BackendKind::Standalone => "standalone",
            BackendKind::Cluster => "cluster",
        }
    }
}

// == Scan Page ==
/// One page of a cursor-based key iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanPage {
    /// Keys matched on this page, possibly empty even when more remain
    pub keys: Vec<String>,
    /// Cursor for the next call; [`SCAN_START`] once the iteration is done
    pub cursor: String,
}

impl ScanPage {
    /// A page that ends the iteration.
    pub fn exhausted(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: SCAN_START.to_string(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == SCAN_START
    }
}

/// Escapes glob metacharacters so `text` only matches itself.
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Turns a literal key prefix into a scan MATCH pattern.
///
/// Everything before an optional trailing `*` matches literally, so the
/// `?` inside implicit keys never acts as a wildcard.
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{}*", escape_glob(prefix.trim_end_matches('*')))
}

// == Cache Backend ==
/// Capability set of a key/value store with expiry and cursor scans.
///
/// Implementations must be safe for concurrent use; callers share one
/// instance for the whole process.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Realization behind this backend.
    fn kind(&self) -> BackendKind;

    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Unconditionally overwrites `key` with `value`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()>;

    /// Deletes the given keys and returns how many existed.
    async fn delete(&self, keys: &[String]) -> BackendResult<u64>;

    /// Returns one page of keys matching the glob `pattern`.
    async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> BackendResult<ScanPage>;

    /// Remaining time to live of `key`, `None` when absent or persistent.
    async fn ttl_remaining(&self, key: &str) -> BackendResult<Option<Duration>>;

    /// Round-trips to the store.
    async fn ping(&self) -> BackendResult<()>;

    /// Approximate number of keys held by the store.
    async fn key_count(&self) -> BackendResult<u64>;
}

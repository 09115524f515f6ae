//! Memory Backend Module
//!
//! In-process key/value store with TTL expiration, ordered cursor scans and
//! a capacity bound. Used for local development and tests.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use globset::GlobBuilder;
use tokio::sync::RwLock;

use super::{BackendError, BackendKind, BackendResult, CacheBackend, ScanPage, SCAN_START};

/// Upper bound for a single TTL, keeps `Instant` arithmetic in range.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

// == Memory Entry ==
/// A stored value with its expiration deadline.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// The stored bytes
    pub value: Vec<u8>,
    /// When the entry was written
    pub created_at: Instant,
    /// When the entry stops being visible
    pub expires_at: Instant,
}

impl MemoryEntry {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` from now.
    pub fn new(value: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            expires_at: now + ttl.min(MAX_TTL),
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its deadline.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    // == Time To Live ==
    /// Remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

// == Memory Backend ==
/// Bounded in-process store.
#[derive(Debug)]
pub struct MemoryBackend {
    /// Entries ordered by key, which makes scan cursors stable under deletes
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
    /// Maximum number of entries held at once
    max_entries: usize,
}

impl MemoryBackend {
    // == Constructor ==
    /// Creates an empty backend holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    // == Sweep Expired ==
    /// Removes all expired entries and returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    // == Length ==
    /// Number of entries currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no entries are held.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Makes room for one more entry.
    ///
    /// Expired entries go first; if none are left to drop, the entry
    /// closest to its deadline is evicted.
    fn make_room(entries: &mut BTreeMap<String, MemoryEntry>, max_entries: usize) {
        if entries.len() < max_entries {
            return;
        }
        entries.retain(|_, entry| !entry.is_expired());
        if entries.len() < max_entries {
            return;
        }
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            entries.remove(&key);
        }
    }
}

/// Parses a scan cursor into the key the previous page stopped at.
fn decode_cursor(cursor: &str) -> BackendResult<Option<String>> {
    if cursor == SCAN_START || cursor.is_empty() {
        return Ok(None);
    }
    cursor
        .strip_prefix('k')
        .map(|key| Some(key.to_string()))
        .ok_or_else(|| BackendError::Config(format!("invalid scan cursor '{cursor}'")))
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            Self::make_room(&mut entries, self.max_entries);
        }
        entries.insert(key.to_string(), MemoryEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> BackendResult<u64> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> BackendResult<ScanPage> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(true)
            .build()?
            .compile_matcher();
        let start = match decode_cursor(cursor)? {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };

        let entries = self.entries.read().await;
        let mut examined = entries.range::<String, _>((start, Bound::Unbounded));
        let mut keys = Vec::new();
        let mut last_seen = None;

        for (key, entry) in examined.by_ref().take(count.max(1)) {
            if !entry.is_expired() && matcher.is_match(key) {
                keys.push(key.clone());
            }
            last_seen = Some(key);
        }

        let cursor = match (last_seen, examined.next()) {
            (Some(last), Some(_)) => format!("k{last}"),
            _ => SCAN_START.to_string(),
        };
        Ok(ScanPage { keys, cursor })
    }

    async fn ttl_remaining(&self, key: &str) -> BackendResult<Option<Duration>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(MemoryEntry::ttl_remaining))
    }

    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn key_count(&self) -> BackendResult<u64> {
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|entry| !entry.is_expired()).count() as u64)
    }
}

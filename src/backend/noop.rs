//! No-op backend used when no store is configured.

use std::time::Duration;

use async_trait::async_trait;

use super::{BackendKind, BackendResult, CacheBackend, ScanPage};

/// Backend where every operation succeeds immediately with an empty result.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

#[async_trait]
impl CacheBackend for NoopBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::None
    }

    async fn get(&self, _key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> BackendResult<()> {
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> BackendResult<u64> {
        Ok(0)
    }

    async fn scan(&self, _pattern: &str, _cursor: &str, _count: usize) -> BackendResult<ScanPage> {
        Ok(ScanPage::exhausted(Vec::new()))
    }

    async fn ttl_remaining(&self, _key: &str) -> BackendResult<Option<Duration>> {
        Ok(None)
    }

    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn key_count(&self) -> BackendResult<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_never_stores() {
        let backend = NoopBackend;
        backend
            .set("k", b"v", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(backend.get("k").await.unwrap().is_none());
        assert_eq!(backend.delete(&["k".to_string()]).await.unwrap(), 0);
        assert!(backend.ttl_remaining("k").await.unwrap().is_none());
        assert_eq!(backend.key_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_noop_scan_is_exhausted() {
        let page = NoopBackend.scan("*", "0", 10).await.unwrap();
        assert!(page.is_exhausted());
        assert!(page.keys.is_empty());
        assert_eq!(NoopBackend.kind(), BackendKind::None);
    }
}

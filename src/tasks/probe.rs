//! Start-up probe
//!
//! One bounded ping at start-up to seed the health status. Later
//! transitions come from live operation outcomes.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{BackendHealth, CacheAdapter};

/// Spawns a single probe of the backend without blocking start-up.
///
/// # Arguments
/// * `adapter` - The shared adapter whose health is updated
/// * `timeout` - Deadline for the ping
///
/// # Returns
/// A JoinHandle resolving to the health recorded by the probe.
pub fn spawn_startup_probe(adapter: CacheAdapter, timeout: Duration) -> JoinHandle<BackendHealth> {
    tokio::spawn(async move {
        let health = adapter.probe(timeout).await;
        match health {
            BackendHealth::Connected => {
                info!(backend = adapter.kind().as_str(), "cache backend reachable at start-up")
            }
            BackendHealth::Disabled => info!("no cache backend configured, caching disabled"),
            BackendHealth::Down => warn!(
                backend = adapter.kind().as_str(),
                timeout_ms = timeout.as_millis() as u64,
                "cache backend unreachable at start-up, serving uncached"
            ),
        }
        health
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_probe_connects_memory_backend() {
        let adapter = CacheAdapter::new(Arc::new(MemoryBackend::new(10)), Duration::from_millis(100));
        assert_eq!(adapter.health(), BackendHealth::Down);

        let health = spawn_startup_probe(adapter.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(health, BackendHealth::Connected);
        assert_eq!(adapter.health(), BackendHealth::Connected);
    }

    #[tokio::test]
    async fn test_probe_disabled_backend() {
        let health = spawn_startup_probe(CacheAdapter::disabled(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(health, BackendHealth::Disabled);
    }
}

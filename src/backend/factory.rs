//! Backend selection at process start.

use std::sync::Arc;

use redis::RedisConnectionInfo;
use tracing::{info, warn};

use super::connect::{AddressMap, Dialer, NodeAddr, TlsOptions};
use super::{
    BackendError, BackendResult, CacheBackend, MemoryBackend, NoopBackend, RedisBackend,
    RedisClusterBackend,
};
use crate::config::{BackendSelector, Config};

/// The backend chosen for this process.
pub struct SelectedBackend {
    /// Backend every component talks to
    pub backend: Arc<dyn CacheBackend>,
    /// Handle on the memory backend, when selected, for its sweep task
    pub memory: Option<Arc<MemoryBackend>>,
}

impl SelectedBackend {
    fn noop() -> Self {
        Self {
            backend: Arc::new(NoopBackend),
            memory: None,
        }
    }
}

/// Builds the backend named by the configuration.
///
/// An unusable configuration disables caching instead of failing start-up.
/// No connection is opened here.
pub fn build_backend(config: &Config) -> SelectedBackend {
    match try_build(config) {
        Ok(selected) => {
            info!(backend = selected.backend.kind().as_str(), "cache backend selected");
            selected
        }
        Err(err) => {
            warn!(error = %err, "cache backend configuration rejected, caching disabled");
            SelectedBackend::noop()
        }
    }
}

fn try_build(config: &Config) -> BackendResult<SelectedBackend> {
    let address_map = match &config.address_map {
        Some(raw) => AddressMap::parse(raw)?,
        None => AddressMap::default(),
    };

    match config.backend {
        BackendSelector::None => Ok(SelectedBackend::noop()),
        BackendSelector::Memory => {
            let memory = Arc::new(MemoryBackend::new(config.max_entries));
            Ok(SelectedBackend {
                backend: memory.clone(),
                memory: Some(memory),
            })
        }
        BackendSelector::Standalone => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                BackendError::Config("REDIS_URL is required for the standalone backend".into())
            })?;
            let backend = RedisBackend::from_url(
                url,
                config.tls_server_name.clone(),
                config.tls_ca_file.clone(),
                address_map,
                config.connect_timeout(),
            )?;
            Ok(SelectedBackend {
                backend: Arc::new(backend),
                memory: None,
            })
        }
        BackendSelector::Cluster => {
            let seeds = config
                .cluster_nodes
                .iter()
                .map(|node| node.parse::<NodeAddr>())
                .collect::<BackendResult<Vec<_>>>()?;
            let redis_info = RedisConnectionInfo {
                username: config.redis_username.clone(),
                password: config.redis_password.clone(),
                ..Default::default()
            };
            let tls = config.redis_tls.then(|| TlsOptions {
                server_name: config.tls_server_name.clone(),
                ca_file: config.tls_ca_file.clone(),
            });
            let dialer = Dialer::new(redis_info, tls, address_map, config.connect_timeout())?;
            let backend = RedisClusterBackend::new(seeds, Arc::new(dialer))?;
            Ok(SelectedBackend {
                backend: Arc::new(backend),
                memory: None,
            })
        }
    }
}

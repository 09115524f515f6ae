//! Configuration Module
//!
//! Handles loading and managing server and cache configuration from
//! environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

// == Backend Selector ==
/// Which cache backend the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelector {
    /// Caching disabled, every operation is a no-op
    None,
    /// In-process store
    Memory,
    /// Single Redis-compatible node
    Standalone,
    /// Redis cluster
    Cluster,
}

impl FromStr for BackendSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "disabled" => Ok(BackendSelector::None),
            "memory" => Ok(BackendSelector::Memory),
            "standalone" | "redis" => Ok(BackendSelector::Standalone),
            "cluster" => Ok(BackendSelector::Cluster),
            other => Err(format!("unknown cache backend '{other}'")),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Selected cache backend
    pub backend: BackendSelector,
    /// Standalone connection URL
    pub redis_url: Option<String>,
    /// Cluster seed nodes as `host:port`
    pub cluster_nodes: Vec<String>,
    /// Cluster username
    pub redis_username: Option<String>,
    /// Cluster password
    pub redis_password: Option<String>,
    /// Use TLS for cluster seeds
    pub redis_tls: bool,
    /// TLS server name override (SNI)
    pub tls_server_name: Option<String>,
    /// Extra PEM root certificates
    pub tls_ca_file: Option<PathBuf>,
    /// Raw `logical:port=dialed:port` rewrite list
    pub address_map: Option<String>,
    /// Default TTL in milliseconds for routes without their own
    pub default_ttl_ms: u64,
    /// Key namespace prefix
    pub key_prefix: String,
    /// Environment tag folded into every key
    pub environment: String,
    /// Per-operation backend timeout in milliseconds
    pub op_timeout_ms: u64,
    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Start-up probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Maximum number of entries for the memory backend
    pub max_entries: usize,
    /// Memory backend sweep interval in seconds
    pub cleanup_interval: u64,
    /// Token guarding the admin surface
    pub admin_token: Option<String>,
    /// Largest purge allowed without an explicit limit
    pub purge_ceiling: usize,
}

/// Reads and parses a variable, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value for {}: {:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Reads a variable, treating an empty value as unset.
fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_BACKEND` - `none`, `memory`, `standalone` or `cluster`
    ///   (default: inferred from `REDIS_URL` / `REDIS_CLUSTER_NODES`, else `none`)
    /// - `REDIS_URL` - Standalone URL
    /// - `REDIS_CLUSTER_NODES` - Comma separated cluster seeds
    /// - `REDIS_USERNAME`, `REDIS_PASSWORD` - Cluster credentials
    /// - `REDIS_TLS` - TLS for cluster seeds (default: false)
    /// - `REDIS_TLS_SERVERNAME` - SNI override
    /// - `REDIS_TLS_CA_FILE` - Extra root certificates
    /// - `REDIS_ADDRESS_MAP` - Address rewrite map
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL (default: 60000)
    /// - `CACHE_PREFIX` - Key prefix (default: cache)
    /// - `APP_ENV` - Environment tag (default: development)
    /// - `CACHE_OP_TIMEOUT_MS` - Backend operation timeout (default: 250)
    /// - `CACHE_CONNECT_TIMEOUT_MS` - Connect timeout (default: 1000)
    /// - `CACHE_PROBE_TIMEOUT_MS` - Start-up probe timeout (default: 2000)
    /// - `CACHE_MAX_ENTRIES` - Memory backend capacity (default: 10000)
    /// - `CACHE_CLEANUP_INTERVAL` - Memory sweep interval in seconds (default: 1)
    /// - `CACHE_ADMIN_TOKEN` - Admin token (default: unset, admin disabled)
    /// - `CACHE_PURGE_CEILING` - Unbounded purge ceiling (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let redis_url = env_opt("REDIS_URL");
        let cluster_nodes: Vec<String> = env_opt("REDIS_CLUSTER_NODES")
            .map(|raw| {
                raw.split(',')
                    .map(|node| node.trim().to_string())
                    .filter(|node| !node.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let backend = match env_opt("CACHE_BACKEND") {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                warn!("{}, caching disabled", err);
                BackendSelector::None
            }),
            None if redis_url.is_some() => BackendSelector::Standalone,
            None if !cluster_nodes.is_empty() => BackendSelector::Cluster,
            None => BackendSelector::None,
        };

        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            backend,
            redis_url,
            cluster_nodes,
            redis_username: env_opt("REDIS_USERNAME"),
            redis_password: env_opt("REDIS_PASSWORD"),
            redis_tls: env_or("REDIS_TLS", defaults.redis_tls),
            tls_server_name: env_opt("REDIS_TLS_SERVERNAME"),
            tls_ca_file: env_opt("REDIS_TLS_CA_FILE").map(PathBuf::from),
            address_map: env_opt("REDIS_ADDRESS_MAP"),
            default_ttl_ms: env_or("CACHE_DEFAULT_TTL_MS", defaults.default_ttl_ms),
            key_prefix: env_opt("CACHE_PREFIX").unwrap_or(defaults.key_prefix),
            environment: env_opt("APP_ENV").unwrap_or(defaults.environment),
            op_timeout_ms: env_or("CACHE_OP_TIMEOUT_MS", defaults.op_timeout_ms),
            connect_timeout_ms: env_or("CACHE_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            probe_timeout_ms: env_or("CACHE_PROBE_TIMEOUT_MS", defaults.probe_timeout_ms),
            max_entries: env_or("CACHE_MAX_ENTRIES", defaults.max_entries),
            cleanup_interval: env_or("CACHE_CLEANUP_INTERVAL", defaults.cleanup_interval),
            admin_token: env_opt("CACHE_ADMIN_TOKEN"),
            purge_ceiling: env_or("CACHE_PURGE_CEILING", defaults.purge_ceiling),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            backend: BackendSelector::None,
            redis_url: None,
            cluster_nodes: Vec::new(),
            redis_username: None,
            redis_password: None,
            redis_tls: false,
            tls_server_name: None,
            tls_ca_file: None,
            address_map: None,
            default_ttl_ms: 60_000,
            key_prefix: "cache".to_string(),
            environment: "development".to_string(),
            op_timeout_ms: 250,
            connect_timeout_ms: 1000,
            probe_timeout_ms: 2000,
            max_entries: 10_000,
            cleanup_interval: 1,
            admin_token: None,
            purge_ceiling: 1000,
        }
    }
}

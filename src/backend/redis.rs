//! Standalone Redis backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{ConnectionAddr, IntoConnectionInfo};

use super::connect::{AddressMap, Dialer, NodeAddr, NodeClient, TlsOptions};
use super::{BackendError, BackendKind, BackendResult, CacheBackend, ScanPage, SCAN_START};

// == Command Helpers ==
// Shared with the cluster backend so both speak the same dialect.

pub(super) fn get_cmd(key: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("GET");
    cmd.arg(key);
    cmd
}

pub(super) fn set_cmd(key: &str, value: &[u8], ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key)
        .arg(value)
        .arg("PX")
        .arg(ttl.as_millis().max(1) as u64);
    cmd
}

pub(super) fn del_cmd(keys: &[String]) -> redis::Cmd {
    let mut cmd = redis::cmd("DEL");
    for key in keys {
        cmd.arg(key);
    }
    cmd
}

pub(super) fn scan_cmd(cursor: u64, pattern: &str, count: usize) -> redis::Cmd {
    let mut cmd = redis::cmd("SCAN");
    cmd.arg(cursor)
        .arg("MATCH")
        .arg(pattern)
        .arg("COUNT")
        .arg(count.max(1));
    cmd
}

pub(super) fn pttl_cmd(key: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("PTTL");
    cmd.arg(key);
    cmd
}

/// Interprets a `PTTL` reply: negative values mean absent or persistent.
pub(super) fn pttl_to_duration(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

pub(super) fn parse_cursor(cursor: &str) -> BackendResult<u64> {
    if cursor.is_empty() {
        return Ok(0);
    }
    cursor
        .parse()
        .map_err(|_| BackendError::Config(format!("invalid scan cursor '{cursor}'")))
}

// == Redis Backend ==
/// Backend talking to a single Redis-compatible node.
#[derive(Debug)]
pub struct RedisBackend {
    node: NodeClient,
}

impl RedisBackend {
    // == Constructor ==
    /// Creates a backend from a `redis://` or `rediss://` URL.
    ///
    /// No connection is opened here; the first operation dials the node.
    ///
    /// # Arguments
    /// * `url` - Connection URL carrying host, port, credentials and database
    /// * `server_name` - SNI override used when the URL selects TLS
    /// * `ca_file` - Extra root certificates for TLS
    /// * `address_map` - Static rewrite of the URL's address to the dialed one
    /// * `connect_timeout` - Budget for establishing a connection
    pub fn from_url(
        url: &str,
        server_name: Option<String>,
        ca_file: Option<std::path::PathBuf>,
        address_map: AddressMap,
        connect_timeout: Duration,
    ) -> BackendResult<Self> {
        let info = url.into_connection_info()?;
        let (addr, tls) = match info.addr {
            ConnectionAddr::Tcp(host, port) => (NodeAddr::new(host, port), None),
            ConnectionAddr::TcpTls { host, port, .. } => (
                NodeAddr::new(host, port),
                Some(TlsOptions {
                    server_name,
                    ca_file,
                }),
            ),
            _ => {
                return Err(BackendError::Config(
                    "only TCP connection URLs are supported".to_string(),
                ))
            }
        };
        let dialer = Dialer::new(info.redis, tls, address_map, connect_timeout)?;
        Ok(Self::with_dialer(addr, Arc::new(dialer)))
    }

    pub fn with_dialer(addr: NodeAddr, dialer: Arc<Dialer>) -> Self {
        Self {
            node: NodeClient::new(addr, dialer),
        }
    }

    pub fn addr(&self) -> &NodeAddr {
        self.node.addr()
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Standalone
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.node.query(&get_cmd(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        self.node.query(&set_cmd(key, value, ttl)).await
    }

    async fn delete(&self, keys: &[String]) -> BackendResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.node.query(&del_cmd(keys)).await
    }

    async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> BackendResult<ScanPage> {
        let cursor = parse_cursor(cursor)?;
        let (next, keys): (u64, Vec<String>) =
            self.node.query(&scan_cmd(cursor, pattern, count)).await?;
        let cursor = if next == 0 {
            SCAN_START.to_string()
        } else {
            next.to_string()
        };
        Ok(ScanPage { keys, cursor })
    }

    async fn ttl_remaining(&self, key: &str) -> BackendResult<Option<Duration>> {
        let pttl: i64 = self.node.query(&pttl_cmd(key)).await?;
        Ok(pttl_to_duration(pttl))
    }

    async fn ping(&self) -> BackendResult<()> {
        let _: String = self.node.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn key_count(&self) -> BackendResult<u64> {
        self.node.query(&redis::cmd("DBSIZE")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_timeout() -> Duration {
        Duration::from_millis(200)
    }

    #[test]
    fn test_set_cmd_uses_millisecond_expiry() {
        let cmd = set_cmd("k", b"v", Duration::from_millis(2000));
        let packed = String::from_utf8(cmd.get_packed_command()).unwrap();
        assert!(packed.contains("SET"));
        assert!(packed.contains("PX"));
        assert!(packed.contains("2000"));
    }

    #[test]
    fn test_set_cmd_never_sends_zero_expiry() {
        let cmd = set_cmd("k", b"v", Duration::ZERO);
        let packed = String::from_utf8(cmd.get_packed_command()).unwrap();
        assert!(packed.ends_with("$1\r\n1\r\n"));
    }

    #[test]
    fn test_pttl_interpretation() {
        assert_eq!(pttl_to_duration(1500), Some(Duration::from_millis(1500)));
        assert_eq!(pttl_to_duration(-1), None);
        assert_eq!(pttl_to_duration(-2), None);
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor("0").unwrap(), 0);
        assert_eq!(parse_cursor("").unwrap(), 0);
        assert_eq!(parse_cursor("1792").unwrap(), 1792);
        assert!(parse_cursor("k/events").is_err());
    }

    #[test]
    fn test_from_url_plain_tcp() {
        let backend = RedisBackend::from_url(
            "redis://:secret@cache.internal:6380/2",
            None,
            None,
            AddressMap::default(),
            connect_timeout(),
        )
        .unwrap();
        assert_eq!(backend.addr(), &NodeAddr::new("cache.internal", 6380));
        assert_eq!(backend.kind(), BackendKind::Standalone);
    }

    #[test]
    fn test_from_url_tls() {
        let backend = RedisBackend::from_url(
            "rediss://cache.internal:6390",
            Some("replication.example.cache".to_string()),
            None,
            AddressMap::default(),
            connect_timeout(),
        )
        .unwrap();
        assert_eq!(backend.addr(), &NodeAddr::new("cache.internal", 6390));
    }

    #[test]
    fn test_from_url_rejects_garbage() {
        let result = RedisBackend::from_url(
            "not a url",
            None,
            None,
            AddressMap::default(),
            connect_timeout(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_reports_errors() {
        let backend = RedisBackend::from_url(
            "redis://127.0.0.1:1",
            None,
            None,
            AddressMap::default(),
            connect_timeout(),
        )
        .unwrap();
        assert!(backend.ping().await.is_err());
        assert!(backend.get("k").await.is_err());
    }
}

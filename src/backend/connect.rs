//! Connection setup for Redis-protocol nodes.
//!
//! Dials nodes through an optional static address rewrite map and wraps
//! the socket in TLS with a pinned server name when configured. The
//! resulting stream is handed to a multiplexed redis connection, so one
//! connection per node serves every concurrent request.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue, Pipeline, RedisConnectionInfo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::{BackendError, BackendResult};

// == Node Address ==
/// A `host:port` pair naming a store node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| BackendError::Config(format!("address '{s}' is missing a port")))?;
        let port = port
            .parse()
            .map_err(|_| BackendError::Config(format!("address '{s}' has an invalid port")))?;
        if host.is_empty() {
            return Err(BackendError::Config(format!("address '{s}' is missing a host")));
        }
        Ok(Self::new(host, port))
    }
}

// == Address Map ==
/// Static rewrite of logical node addresses to the addresses actually dialed.
///
/// Managed clusters announce internal addresses; when reaching them through
/// a tunnel every announced `host:port` must be translated to its local end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    routes: HashMap<NodeAddr, NodeAddr>,
}

impl AddressMap {
    /// Parses `logical:port=dialed:port` pairs separated by commas.
    pub fn parse(spec: &str) -> BackendResult<Self> {
        let mut routes = HashMap::new();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (from, to) = pair.split_once('=').ok_or_else(|| {
                BackendError::Config(format!("address map entry '{pair}' is missing '='"))
            })?;
            routes.insert(from.parse()?, to.parse()?);
        }
        Ok(Self { routes })
    }

    /// Address to dial for `logical`; unmapped addresses are dialed as-is.
    pub fn resolve<'a>(&'a self, logical: &'a NodeAddr) -> &'a NodeAddr {
        self.routes.get(logical).unwrap_or(logical)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// == TLS Options ==
/// TLS settings for node connections.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Server name presented via SNI and verified against the certificate;
    /// defaults to the logical host of each node
    pub server_name: Option<String>,
    /// Additional PEM encoded root certificates
    pub ca_file: Option<PathBuf>,
}

impl TlsOptions {
    /// Builds the rustls client configuration.
    fn client_config(&self) -> BackendResult<Arc<ClientConfig>> {
        let mut roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        if let Some(path) = &self.ca_file {
            let file = File::open(path).map_err(|e| {
                BackendError::Tls(format!("cannot open CA file {}: {e}", path.display()))
            })?;
            for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                let cert = cert.map_err(|e| BackendError::Tls(format!("bad CA file: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| BackendError::Tls(format!("rejected CA certificate: {e}")))?;
            }
        }

        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| BackendError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

/// Byte stream a multiplexed connection can run over.
trait NodeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> NodeStream for T {}

// == Dialer ==
/// Opens authenticated connections to store nodes.
pub struct Dialer {
    address_map: AddressMap,
    tls: Option<(TlsConnector, Option<String>)>,
    redis_info: RedisConnectionInfo,
    connect_timeout: Duration,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("address_map", &self.address_map)
            .field("tls", &self.tls.is_some())
            .field("db", &self.redis_info.db)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Dialer {
    // == Constructor ==
    /// Creates a dialer.
    ///
    /// # Arguments
    /// * `redis_info` - Credentials and database selected after connecting
    /// * `tls` - TLS settings, `None` for plain TCP
    /// * `address_map` - Static rewrite applied to every dialed address
    /// * `connect_timeout` - Budget for TCP connect plus TLS handshake
    pub fn new(
        redis_info: RedisConnectionInfo,
        tls: Option<TlsOptions>,
        address_map: AddressMap,
        connect_timeout: Duration,
    ) -> BackendResult<Self> {
        let tls = match tls {
            Some(options) => {
                let connector = TlsConnector::from(options.client_config()?);
                Some((connector, options.server_name))
            }
            None => None,
        };
        Ok(Self {
            address_map,
            tls,
            redis_info,
            connect_timeout,
        })
    }

    /// Server name used for the TLS handshake with `logical`.
    fn server_name(&self, logical: &NodeAddr) -> Option<String> {
        self.tls.as_ref().map(|(_, pinned)| {
            pinned
                .clone()
                .unwrap_or_else(|| logical.host.clone())
        })
    }

    // == Connect ==
    /// Connects to the node known as `logical`.
    pub async fn connect(&self, logical: &NodeAddr) -> BackendResult<MultiplexedConnection> {
        tokio::time::timeout(self.connect_timeout, self.establish(logical))
            .await
            .map_err(|_| BackendError::Timeout(self.connect_timeout))?
    }

    async fn establish(&self, logical: &NodeAddr) -> BackendResult<MultiplexedConnection> {
        let target = self.address_map.resolve(logical);
        debug!(node = %logical, dialed = %target, "connecting to cache node");

        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        tcp.set_nodelay(true)?;

        let stream: Box<dyn NodeStream> = match (&self.tls, self.server_name(logical)) {
            (Some((connector, _)), Some(name)) => {
                let server_name = ServerName::try_from(name.clone())
                    .map_err(|e| BackendError::Tls(format!("invalid server name '{name}': {e}")))?;
                Box::new(connector.connect(server_name, tcp).await?)
            }
            _ => Box::new(tcp),
        };

        let (connection, driver) = MultiplexedConnection::new(&self.redis_info, stream).await?;
        tokio::spawn(driver);
        Ok(connection)
    }
}

// == Node Client ==
/// Lazily connected, shared handle to one node.
///
/// The connection is established on first use and dropped after an I/O
/// failure so the next operation dials again. There is no background retry.
///
/// Dialing runs in its own task bounded only by the connect timeout, so a
/// caller cancelled by a shorter operation timeout leaves the connection
/// for the next operation.
pub struct NodeClient {
    addr: NodeAddr,
    dialer: Arc<Dialer>,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl NodeClient {
    pub fn new(addr: NodeAddr, dialer: Arc<Dialer>) -> Self {
        Self {
            addr,
            dialer,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    async fn connection(&self) -> BackendResult<MultiplexedConnection> {
        let mut slot = Arc::clone(&self.connection).lock_owned().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        // The task owns the slot lock until the dial settles; concurrent
        // callers queue on the lock and pick up the stored connection.
        let dialer = Arc::clone(&self.dialer);
        let addr = self.addr.clone();
        let dial = tokio::spawn(async move {
            let connection = dialer.connect(&addr).await?;
            *slot = Some(connection.clone());
            Ok::<_, BackendError>(connection)
        });
        dial.await.map_err(std::io::Error::from)?
    }

    async fn forget_on_failure(&self, err: &redis::RedisError) {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            warn!(node = %self.addr, error = %err, "dropping broken cache connection");
            self.connection.lock().await.take();
        }
    }

    // == Query ==
    /// Runs a single command on this node.
    pub async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> BackendResult<T> {
        let mut connection = self.connection().await?;
        match cmd.query_async(&mut connection).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.forget_on_failure(&err).await;
                Err(err.into())
            }
        }
    }

    /// Runs a pipeline on this node.
    pub async fn query_pipeline<T: FromRedisValue>(&self, pipeline: &Pipeline) -> BackendResult<T> {
        let mut connection = self.connection().await?;
        match pipeline.query_async(&mut connection).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.forget_on_failure(&err).await;
                Err(err.into())
            }
        }
    }
}

impl fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClient").field("addr", &self.addr).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_node_addr_parse() {
        let addr: NodeAddr = "cache.internal:6380".parse().unwrap();
        assert_eq!(addr, NodeAddr::new("cache.internal", 6380));
        assert_eq!(addr.to_string(), "cache.internal:6380");
    }

    #[test]
    fn test_node_addr_rejects_missing_port() {
        assert!("cache.internal".parse::<NodeAddr>().is_err());
        assert!("cache.internal:http".parse::<NodeAddr>().is_err());
        assert!(":6379".parse::<NodeAddr>().is_err());
    }

    #[test]
    fn test_address_map_resolves_mapped_and_passes_through_others() {
        let map = AddressMap::parse(
            "clustercfg.example.cache:6379=127.0.0.1:7000, 10.0.1.5:6379=127.0.0.1:7001",
        )
        .unwrap();

        let logical = NodeAddr::new("10.0.1.5", 6379);
        assert_eq!(map.resolve(&logical), &NodeAddr::new("127.0.0.1", 7001));

        let unmapped = NodeAddr::new("10.0.1.9", 6379);
        assert_eq!(map.resolve(&unmapped), &unmapped);
    }

    #[test]
    fn test_address_map_rejects_malformed_entry() {
        let result = AddressMap::parse("10.0.1.5:6379->127.0.0.1:7001");
        assert!(matches!(result, Err(BackendError::Config(_))));
    }

    #[test]
    fn test_empty_address_map() {
        assert!(AddressMap::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_server_name_prefers_pinned_name() {
        let tls = TlsOptions {
            server_name: Some("clustercfg.example.cache".to_string()),
            ca_file: None,
        };
        let dialer = Dialer::new(
            RedisConnectionInfo::default(),
            Some(tls),
            AddressMap::default(),
            Duration::from_secs(1),
        )
        .unwrap();

        let name = dialer.server_name(&NodeAddr::new("127.0.0.1", 7000));
        assert_eq!(name.as_deref(), Some("clustercfg.example.cache"));
    }

    #[test]
    fn test_server_name_absent_without_tls() {
        let dialer = Dialer::new(
            RedisConnectionInfo::default(),
            None,
            AddressMap::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(dialer
            .server_name(&NodeAddr::new("127.0.0.1", 7000))
            .is_none());
    }

    /// Minimal RESP server answering `+OK` to every command. The first reply
    /// on each connection is held back by `stall`.
    async fn spawn_slow_server(stall: Duration) -> (NodeAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    let mut first = true;
                    while let Ok(Some(header)) = lines.next_line().await {
                        let Some(args) = header.strip_prefix('*') else {
                            continue;
                        };
                        // Each argument is a `$len` line followed by its data
                        for _ in 0..args.parse::<usize>().unwrap_or(0) * 2 {
                            if lines.next_line().await.ok().flatten().is_none() {
                                return;
                            }
                        }
                        if first {
                            tokio::time::sleep(stall).await;
                            first = false;
                        }
                        if write.write_all(b"+OK\r\n").await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (NodeAddr::new("127.0.0.1", port), accepted)
    }

    #[tokio::test]
    async fn test_cancelled_operation_keeps_dialed_connection() {
        let (addr, accepted) = spawn_slow_server(Duration::from_millis(200)).await;
        let dialer = Arc::new(
            Dialer::new(
                RedisConnectionInfo::default(),
                None,
                AddressMap::default(),
                Duration::from_secs(2),
            )
            .unwrap(),
        );
        let node = NodeClient::new(addr, dialer);

        // Shorter than the stalled reply, like a per-operation timeout
        let first = tokio::time::timeout(
            Duration::from_millis(50),
            node.query::<String>(&redis::cmd("PING")),
        )
        .await;
        assert!(first.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;

        let second = tokio::time::timeout(
            Duration::from_secs(1),
            node.query::<String>(&redis::cmd("PING")),
        )
        .await;
        assert_eq!(second.unwrap().unwrap(), "OK");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        let dialer = Arc::new(
            Dialer::new(
                RedisConnectionInfo::default(),
                None,
                AddressMap::default(),
                Duration::from_millis(500),
            )
            .unwrap(),
        );
        // Port 1 on loopback is reserved and closed in test environments.
        let node = NodeClient::new(NodeAddr::new("127.0.0.1", 1), dialer);
        let result: BackendResult<String> = node.query(&redis::cmd("PING")).await;
        assert!(result.is_err());
    }
}

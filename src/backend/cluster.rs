//! Clustered Redis backend.
//!
//! Keys are routed to the master owning their hash slot. The slot map is
//! loaded lazily from `CLUSTER SLOTS` and reloaded after a `MOVED`
//! redirection. Node addresses announced by the cluster pass through the
//! dialer's address map, so a cluster reached through a tunnel works with
//! the addresses it announces internally.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{Cmd, ErrorKind, FromRedisValue, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connect::{Dialer, NodeAddr, NodeClient};
use super::redis::{del_cmd, get_cmd, parse_cursor, pttl_cmd, pttl_to_duration, scan_cmd, set_cmd};
use super::{BackendError, BackendKind, BackendResult, CacheBackend, ScanPage, SCAN_START};

/// Number of hash slots in a Redis cluster.
const SLOT_COUNT: u16 = 16384;

// == Hash Slots ==
/// CRC16/XMODEM as used by Redis cluster key hashing.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Hash slot of `key`, honoring `{hash tags}`.
pub fn key_slot(key: &str) -> u16 {
    let bytes = key.as_bytes();
    let hashed = match bytes.iter().position(|b| *b == b'{') {
        Some(open) => match bytes[open + 1..].iter().position(|b| *b == b'}') {
            Some(len) if len > 0 => &bytes[open + 1..open + 1 + len],
            _ => bytes,
        },
        None => bytes,
    };
    crc16(hashed) % SLOT_COUNT
}

// == Topology ==
#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotRange {
    start: u16,
    end: u16,
    master: NodeAddr,
}

/// Slot ownership as reported by the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Topology {
    ranges: Vec<SlotRange>,
}

impl Topology {
    fn master_for(&self, slot: u16) -> Option<&NodeAddr> {
        self.ranges
            .iter()
            .find(|range| range.start <= slot && slot <= range.end)
            .map(|range| &range.master)
    }

    /// Distinct masters in address order.
    fn masters(&self) -> Vec<NodeAddr> {
        self.ranges
            .iter()
            .map(|range| range.master.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) => Some(*n),
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        Value::SimpleString(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parses a `CLUSTER SLOTS` reply.
///
/// An empty or `?` host means "the node that answered", per the protocol.
fn parse_slots(reply: &Value, answered_by: &NodeAddr) -> BackendResult<Topology> {
    let malformed = || BackendError::Cluster("malformed CLUSTER SLOTS reply".to_string());
    let Value::Array(entries) = reply else {
        return Err(malformed());
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Array(fields) = entry else {
            return Err(malformed());
        };
        let (Some(start), Some(end), Some(Value::Array(master))) = (
            fields.first().and_then(as_int),
            fields.get(1).and_then(as_int),
            fields.get(2),
        ) else {
            return Err(malformed());
        };
        let host = master.first().and_then(as_text).ok_or_else(malformed)?;
        let port = master.get(1).and_then(as_int).ok_or_else(malformed)?;

        let host = if host.is_empty() || host == "?" {
            answered_by.host.clone()
        } else {
            host
        };
        let port = u16::try_from(port).map_err(|_| malformed())?;
        let (start, end) = (
            u16::try_from(start).map_err(|_| malformed())?,
            u16::try_from(end).map_err(|_| malformed())?,
        );
        ranges.push(SlotRange {
            start,
            end,
            master: NodeAddr::new(host, port),
        });
    }
    ranges.sort_by_key(|range| range.start);
    Ok(Topology { ranges })
}

// == Cluster Cursor ==
// A cluster scan walks masters one after another: `<node-index>:<node-cursor>`.

fn decode_cluster_cursor(cursor: &str) -> BackendResult<(usize, u64)> {
    if cursor == SCAN_START || cursor.is_empty() {
        return Ok((0, 0));
    }
    let invalid = || BackendError::Config(format!("invalid cluster scan cursor '{cursor}'"));
    let (index, node_cursor) = cursor.split_once(':').ok_or_else(invalid)?;
    let index = index.parse().map_err(|_| invalid())?;
    Ok((index, parse_cursor(node_cursor)?))
}

fn encode_cluster_cursor(index: usize, node_cursor: u64, masters: usize) -> String {
    if node_cursor != 0 {
        format!("{index}:{node_cursor}")
    } else if index + 1 < masters {
        format!("{}:0", index + 1)
    } else {
        SCAN_START.to_string()
    }
}

fn redirect_target(err: &redis::RedisError) -> BackendResult<NodeAddr> {
    let (addr, _slot) = err
        .redirect_node()
        .ok_or_else(|| BackendError::Cluster(format!("redirect without target: {err}")))?;
    addr.parse()
}

// == Cluster Backend ==
/// Backend spread over the masters of a Redis cluster.
#[derive(Debug)]
pub struct RedisClusterBackend {
    seeds: Vec<NodeAddr>,
    dialer: Arc<Dialer>,
    nodes: RwLock<HashMap<NodeAddr, Arc<NodeClient>>>,
    topology: RwLock<Topology>,
}

impl RedisClusterBackend {
    // == Constructor ==
    /// Creates a cluster backend from seed addresses.
    ///
    /// Seeds are logical addresses; the dialer rewrites them if mapped.
    /// Nothing is dialed until the first operation.
    pub fn new(seeds: Vec<NodeAddr>, dialer: Arc<Dialer>) -> BackendResult<Self> {
        if seeds.is_empty() {
            return Err(BackendError::Config(
                "cluster backend needs at least one seed node".to_string(),
            ));
        }
        Ok(Self {
            seeds,
            dialer,
            nodes: RwLock::new(HashMap::new()),
            topology: RwLock::new(Topology::default()),
        })
    }

    async fn node(&self, addr: &NodeAddr) -> Arc<NodeClient> {
        if let Some(node) = self.nodes.read().await.get(addr) {
            return node.clone();
        }
        let mut nodes = self.nodes.write().await;
        nodes
            .entry(addr.clone())
            .or_insert_with(|| Arc::new(NodeClient::new(addr.clone(), self.dialer.clone())))
            .clone()
    }

    // == Topology Refresh ==
    /// Reloads the slot map from the first node that answers.
    async fn refresh_topology(&self) -> BackendResult<()> {
        let mut candidates = self.topology.read().await.masters();
        candidates.extend(self.seeds.iter().cloned());

        let mut cmd = redis::cmd("CLUSTER");
        cmd.arg("SLOTS");

        let mut last_error = None;
        for addr in candidates {
            let node = self.node(&addr).await;
            match node.query::<Value>(&cmd).await {
                Ok(reply) => {
                    let topology = parse_slots(&reply, &addr)?;
                    if topology.is_empty() {
                        last_error = Some(BackendError::Cluster(format!(
                            "node {addr} reported no slot ranges"
                        )));
                        continue;
                    }
                    info!(
                        masters = topology.masters().len(),
                        ranges = topology.ranges.len(),
                        "cache cluster topology loaded"
                    );
                    *self.topology.write().await = topology;
                    return Ok(());
                }
                Err(err) => {
                    warn!(node = %addr, error = %err, "cluster topology probe failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| BackendError::Cluster("no cluster node reachable".to_string())))
    }

    async fn ensure_topology(&self) -> BackendResult<()> {
        if self.topology.read().await.is_empty() {
            self.refresh_topology().await?;
        }
        Ok(())
    }

    async fn masters(&self) -> BackendResult<Vec<NodeAddr>> {
        self.ensure_topology().await?;
        Ok(self.topology.read().await.masters())
    }

    async fn route(&self, key: &str) -> BackendResult<Arc<NodeClient>> {
        self.ensure_topology().await?;
        let slot = key_slot(key);
        let master = self
            .topology
            .read()
            .await
            .master_for(slot)
            .cloned()
            .ok_or_else(|| BackendError::Cluster(format!("slot {slot} is not covered")))?;
        Ok(self.node(&master).await)
    }

    // == Execute ==
    /// Runs a single-key command on the owning master, following one redirect.
    async fn exec<T: FromRedisValue + Send>(&self, key: &str, cmd: &Cmd) -> BackendResult<T> {
        let node = self.route(key).await?;
        let err = match node.query::<T>(cmd).await {
            Err(BackendError::Redis(err))
                if matches!(err.kind(), ErrorKind::Moved | ErrorKind::Ask) =>
            {
                err
            }
            other => return other,
        };

        let target = redirect_target(&err)?;
        if err.kind() == ErrorKind::Ask {
            debug!(key, node = %target, "following ASK redirect");
            let mut pipeline = redis::pipe();
            pipeline.cmd("ASKING").ignore().add_command(cmd.clone());
            let (value,): (T,) = self.node(&target).await.query_pipeline(&pipeline).await?;
            return Ok(value);
        }

        debug!(key, node = %target, "following MOVED redirect");
        if let Err(refresh_err) = self.refresh_topology().await {
            warn!(error = %refresh_err, "topology refresh after MOVED failed");
        }
        self.node(&target).await.query(cmd).await
    }
}

#[async_trait]
impl CacheBackend for RedisClusterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cluster
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.exec(key, &get_cmd(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        self.exec(key, &set_cmd(key, value, ttl)).await
    }

    async fn delete(&self, keys: &[String]) -> BackendResult<u64> {
        // Keys may live in different slots, so each one goes out on its own.
        let mut removed = 0;
        for key in keys {
            let count: u64 = self.exec(key, &del_cmd(std::slice::from_ref(key))).await?;
            removed += count;
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str, cursor: &str, count: usize) -> BackendResult<ScanPage> {
        let masters = self.masters().await?;
        let (index, node_cursor) = decode_cluster_cursor(cursor)?;
        let Some(addr) = masters.get(index) else {
            return Ok(ScanPage::exhausted(Vec::new()));
        };

        let (next, keys): (u64, Vec<String>) = self
            .node(addr)
            .await
            .query(&scan_cmd(node_cursor, pattern, count))
            .await?;
        Ok(ScanPage {
            keys,
            cursor: encode_cluster_cursor(index, next, masters.len()),
        })
    }

    async fn ttl_remaining(&self, key: &str) -> BackendResult<Option<Duration>> {
        let pttl: i64 = self.exec(key, &pttl_cmd(key)).await?;
        Ok(pttl_to_duration(pttl))
    }

    async fn ping(&self) -> BackendResult<()> {
        self.refresh_topology().await?;
        let masters = self.topology.read().await.masters();
        for addr in masters {
            let _: String = self.node(&addr).await.query(&redis::cmd("PING")).await?;
        }
        Ok(())
    }

    async fn key_count(&self) -> BackendResult<u64> {
        let mut total = 0;
        for addr in self.masters().await? {
            let count: u64 = self.node(&addr).await.query(&redis::cmd("DBSIZE")).await?;
            total += count;
        }
        Ok(total)
    }
}

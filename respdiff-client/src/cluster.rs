//! Slot-routed dispatch for cluster endpoints.
//!
//! Topology comes from `CLUSTER NODES` on any reachable seed; data
//! commands route by CRC16 hash slot (with `{hash tag}` support) to the
//! master serving that slot. A `MOVED` redirect refreshes the topology
//! and replays the command or batch.

use respdiff_core::{ClientError, EndpointConfig, FxHashMap};

use crate::client::PipeSlot;
use crate::codec::is_wrong_type;
use crate::conn::Connection;
use crate::endpoint::{master_nodes, parse_cluster_nodes};
use crate::resp::{Command, Reply};

pub const SLOT_COUNT: usize = 16384;

const MOVED_ATTEMPTS: u32 = 3;

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC16/XMODEM, the cluster key-slot hash.
const CRC16_TABLE: [u16; 256] = build_crc16_table();

pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc = (crc << 8) ^ CRC16_TABLE[(((crc >> 8) ^ b as u16) & 0xff) as usize];
    }
    crc
}

/// The slot-relevant portion of a key: the first non-empty `{...}` tag if
/// present, the whole key otherwise.
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(close) = key[open + 1..].iter().position(|&b| b == b'}') {
            if close > 0 {
                return &key[open + 1..open + 1 + close];
            }
        }
    }
    key
}

pub fn key_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT as u16
}

struct Node {
    addr: String,
    conn: Connection,
}

/// Connections to every master plus the slot → master map.
pub struct ClusterConn {
    endpoint: EndpointConfig,
    nodes: Vec<Node>,
    /// Index into `nodes` per slot; `u16::MAX` marks an unassigned slot.
    slots: Vec<u16>,
}

impl ClusterConn {
    /// Discover the topology through the first reachable seed and dial
    /// every master.
    pub fn connect(endpoint: &EndpointConfig) -> Result<Self, ClientError> {
        let mut cluster = Self {
            endpoint: endpoint.clone(),
            nodes: Vec::new(),
            slots: vec![u16::MAX; SLOT_COUNT],
        };
        cluster.refresh()?;
        Ok(cluster)
    }

    fn dial(&self, addr: &str) -> Result<Connection, ClientError> {
        // No SELECT on cluster nodes: they only serve db 0.
        Connection::open(
            addr,
            self.endpoint.timeout_ms,
            self.endpoint.password.as_deref(),
            self.endpoint.auth_command,
            None,
        )
    }

    /// Re-read `CLUSTER NODES` and rebuild connections and the slot map.
    fn refresh(&mut self) -> Result<(), ClientError> {
        let seeds: Vec<String> = if self.nodes.is_empty() {
            self.endpoint.addrs.clone()
        } else {
            self.nodes.iter().map(|n| n.addr.clone()).collect()
        };

        let mut last = None;
        for seed in &seeds {
            let mut conn = match self.dial(seed) {
                Ok(conn) => conn,
                Err(e) => {
                    last = Some(e);
                    continue;
                }
            };
            let reply = match conn.call(&Command::new("CLUSTER").arg("NODES")) {
                Ok(reply) => reply,
                Err(e) => {
                    last = Some(e);
                    continue;
                }
            };
            let content = reply.into_bytes("CLUSTER NODES")?;
            let masters = master_nodes(&parse_cluster_nodes(&content));
            if masters.is_empty() {
                last = Some(ClientError::Protocol {
                    addr: seed.clone(),
                    message: "CLUSTER NODES reported no masters".to_string(),
                });
                continue;
            }

            let mut nodes = Vec::with_capacity(masters.len());
            let mut slots = vec![u16::MAX; SLOT_COUNT];
            for info in &masters {
                let conn = self.dial(&info.addr)?;
                let idx = nodes.len() as u16;
                for &(start, end) in &info.slot_ranges {
                    for slot in start..=end {
                        slots[slot as usize] = idx;
                    }
                }
                nodes.push(Node {
                    addr: info.addr.clone(),
                    conn,
                });
            }

            tracing::debug!(masters = nodes.len(), "cluster topology refreshed");
            self.nodes = nodes;
            self.slots = slots;
            return Ok(());
        }

        Err(last.unwrap_or_else(|| ClientError::Io {
            addr: self.endpoint.addrs.join(";"),
            message: "no seed address reachable".to_string(),
        }))
    }

    fn node_index(&self, cmd: &Command) -> Result<usize, ClientError> {
        // Keyless commands go to the first node.
        let Some(key) = cmd.routing_key() else {
            return Ok(0);
        };
        let slot = key_slot(key);
        let idx = self.slots[slot as usize];
        if idx == u16::MAX {
            return Err(ClientError::NoNodeForSlot { slot });
        }
        Ok(idx as usize)
    }

    /// One routed round trip, following `MOVED` by refreshing the
    /// topology.
    pub fn call(&mut self, cmd: &Command) -> Result<Reply, ClientError> {
        let mut last = None;
        for _ in 0..MOVED_ATTEMPTS {
            let idx = self.node_index(cmd)?;
            match self.nodes[idx].conn.call(cmd) {
                Ok(reply) => return Ok(reply),
                Err(e) if is_redirect(&e) => {
                    self.refresh()?;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.expect("redirect loop entered at least once"))
    }

    /// Routed pipeline: group commands per node keeping the original
    /// index, flush each node once, drain in order, reassemble. Any
    /// redirect replays the whole batch on a fresh topology.
    pub fn pipe(&mut self, cmds: &[Command]) -> Result<Vec<PipeSlot>, ClientError> {
        let mut last = None;
        for _ in 0..MOVED_ATTEMPTS {
            let mut per_node: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
            for (i, cmd) in cmds.iter().enumerate() {
                per_node.entry(self.node_index(cmd)?).or_default().push(i);
            }

            let mut slots: Vec<Option<PipeSlot>> = vec![None; cmds.len()];
            let mut redirect = None;
            'nodes: for (node_idx, cmd_indices) in per_node {
                let node = &mut self.nodes[node_idx];
                for &i in &cmd_indices {
                    node.conn.send(&cmds[i])?;
                }
                node.conn.flush()?;
                for &i in &cmd_indices {
                    match node.conn.receive() {
                        Ok(reply) => slots[i] = Some(PipeSlot::Reply(reply)),
                        Err(e) if is_wrong_type(&e) => slots[i] = Some(PipeSlot::WrongType),
                        Err(e) if is_redirect(&e) => {
                            redirect = Some(e);
                            break 'nodes;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            if let Some(e) = redirect {
                // refresh re-dials every master, so replies left unread on
                // the old connections cannot desync the new ones
                self.refresh()?;
                last = Some(e);
                continue;
            }
            return Ok(slots
                .into_iter()
                .map(|s| s.expect("every index assigned to exactly one node"))
                .collect());
        }
        Err(last.expect("redirect loop entered at least once"))
    }
}

fn is_redirect(err: &ClientError) -> bool {
    matches!(err, ClientError::Server { message }
        if message.starts_with("MOVED") || message.starts_with("ASK"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_vector() {
        // The reference vector from the cluster specification.
        assert_eq!(crc16(b"123456789"), 0x31c3);
    }

    #[test]
    fn test_hash_tag_extraction() {
        // Vectors from the cluster specification.
        assert_eq!(hash_tag(b"{user1000}.following"), b"user1000");
        assert_eq!(hash_tag(b"foo{}{bar}"), &b"foo{}{bar}"[..]);
        assert_eq!(hash_tag(b"foo{{bar}}zap"), b"{bar");
        assert_eq!(hash_tag(b"foo{bar}{zap}"), b"bar");
    }

    #[test]
    fn test_key_slot_uses_hash_tag() {
        assert_eq!(key_slot(b"{user1000}.following"), key_slot(b"{user1000}.followers"));
    }

    #[test]
    fn test_slot_in_range() {
        for key in [&b"a"[..], b"abc", b"{tag}x", b""] {
            assert!((key_slot(key) as usize) < SLOT_COUNT);
        }
    }
}

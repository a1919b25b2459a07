//! The pipelined store client: batched probes with reconnect-and-retry.
//!
//! All `pipe_*` operations enqueue one send per input key, flush once, and
//! drain replies in order; the result is index-aligned with the input.
//! Transport errors are retried with a forced reconnect (which re-runs
//! AUTH and SELECT); a `WRONGTYPE` reply poisons only its own slot.

use std::thread;

use respdiff_core::constants::{MAX_RETRY_COUNT, RETRY_BACKOFF, TYPE_CHANGED};
use respdiff_core::{ClientError, EndpointConfig, EndpointKind, FxHashMap, KeyRecord, ValueType};

use crate::cluster::ClusterConn;
use crate::codec::is_wrong_type;
use crate::conn::Connection;
use crate::resp::{Command, Reply};

/// One slot of a pipelined reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeSlot {
    Reply(Reply),
    /// The probe raced a type change; classification maps this to the
    /// `TYPE_CHANGED` sentinel.
    WrongType,
}

enum Backend {
    Direct(Connection),
    Cluster(ClusterConn),
}

/// A client bound to one endpoint and one logical database.
///
/// Each verifier worker owns a source/target pair of these for the
/// duration of a round.
pub struct StoreClient {
    endpoint: EndpointConfig,
    db: i32,
    backend: Option<Backend>,
}

impl StoreClient {
    /// Build a client and verify liveness with a `PING`.
    pub fn new(endpoint: &EndpointConfig, db: i32) -> Result<Self, ClientError> {
        let mut client = Self {
            endpoint: endpoint.clone(),
            db,
            backend: None,
        };
        let pong = client.do_command(&Command::new("PING"))?.into_status("PING")?;
        if pong != "PONG" {
            return Err(ClientError::UnexpectedReply {
                command: "PING".to_string(),
                message: pong,
            });
        }
        Ok(client)
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    fn addr_label(&self) -> String {
        self.endpoint.addrs.join(";")
    }

    fn ensure_connected(&mut self) -> Result<(), ClientError> {
        if self.backend.is_none() {
            let backend = match self.endpoint.kind {
                EndpointKind::Cluster => Backend::Cluster(ClusterConn::connect(&self.endpoint)?),
                _ => {
                    let conn = Connection::open(
                        &self.endpoint.addrs[0],
                        self.endpoint.timeout_ms,
                        self.endpoint.password.as_deref(),
                        self.endpoint.auth_command,
                        Some(self.db),
                    )?;
                    Backend::Direct(conn)
                }
            };
            tracing::debug!(addr = %self.addr_label(), db = self.db, "connected");
            self.backend = Some(backend);
        }
        Ok(())
    }

    /// Drop the connection and back off if the error is a network
    /// condition; returns whether a retry is warranted.
    fn handle_net_error(&mut self, err: &ClientError) -> bool {
        if !err.is_transient() {
            return false;
        }
        self.backend = None;
        thread::sleep(RETRY_BACKOFF);
        true
    }

    fn exhausted(&self, last: Option<ClientError>) -> ClientError {
        ClientError::RetriesExhausted {
            addr: self.addr_label(),
            attempts: MAX_RETRY_COUNT,
            last: last.map(|e| e.to_string()).unwrap_or_else(|| "unknown".into()),
        }
    }

    /// One command with the standard retry policy. Used for scans, paged
    /// range reads, and stream commands.
    pub fn do_command(&mut self, cmd: &Command) -> Result<Reply, ClientError> {
        let mut last = None;
        for _ in 0..MAX_RETRY_COUNT {
            if let Err(e) = self.ensure_connected() {
                if self.handle_net_error(&e) {
                    last = Some(e);
                    continue;
                }
                return Err(e);
            }
            let result = match self.backend.as_mut().expect("connected") {
                Backend::Direct(conn) => conn.call(cmd),
                Backend::Cluster(cluster) => cluster.call(cmd),
            };
            match result {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    if self.handle_net_error(&e) {
                        last = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(self.exhausted(last))
    }

    /// Pipeline a batch: send everything, flush once, drain in order.
    /// A transport error restarts the whole batch on a fresh connection.
    pub fn pipe_raw(&mut self, cmds: &[Command]) -> Result<Vec<PipeSlot>, ClientError> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let mut last = None;
        for _ in 0..MAX_RETRY_COUNT {
            if let Err(e) = self.ensure_connected() {
                if self.handle_net_error(&e) {
                    last = Some(e);
                    continue;
                }
                return Err(e);
            }
            let result = match self.backend.as_mut().expect("connected") {
                Backend::Direct(conn) => Self::pipe_direct(conn, cmds),
                Backend::Cluster(cluster) => cluster.pipe(cmds),
            };
            match result {
                Ok(slots) => return Ok(slots),
                Err(e) => {
                    if self.handle_net_error(&e) {
                        last = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(self.exhausted(last))
    }

    fn pipe_direct(conn: &mut Connection, cmds: &[Command]) -> Result<Vec<PipeSlot>, ClientError> {
        for cmd in cmds {
            conn.send(cmd)?;
        }
        conn.flush()?;

        let mut slots = Vec::with_capacity(cmds.len());
        for _ in cmds {
            match conn.receive() {
                Ok(reply) => slots.push(PipeSlot::Reply(reply)),
                Err(e) if is_wrong_type(&e) => slots.push(PipeSlot::WrongType),
                Err(e) => return Err(e),
            }
        }
        Ok(slots)
    }

    /// `TYPE` per key.
    pub fn pipe_type(&mut self, records: &[KeyRecord]) -> Result<Vec<ValueType>, ClientError> {
        let cmds: Vec<Command> = records
            .iter()
            .map(|r| Command::new("TYPE").arg(r.key.clone()))
            .collect();
        self.pipe_raw(&cmds)?
            .into_iter()
            .map(|slot| match slot {
                PipeSlot::Reply(reply) => Ok(ValueType::from_wire(&reply.into_status("TYPE")?)),
                PipeSlot::WrongType => Err(ClientError::UnexpectedReply {
                    command: "TYPE".to_string(),
                    message: "WRONGTYPE for a TYPE probe".to_string(),
                }),
            })
            .collect()
    }

    /// `EXISTS` per key: 0 or 1.
    pub fn pipe_exists(&mut self, records: &[KeyRecord]) -> Result<Vec<i64>, ClientError> {
        let cmds: Vec<Command> = records
            .iter()
            .map(|r| Command::new("EXISTS").arg(r.key.clone()))
            .collect();
        self.pipe_raw(&cmds)?
            .into_iter()
            .map(|slot| match slot {
                PipeSlot::Reply(reply) => reply.into_int("EXISTS"),
                PipeSlot::WrongType => Ok(TYPE_CHANGED),
            })
            .collect()
    }

    /// Cardinality per key, via each key's type-specific length command.
    /// A `WRONGTYPE` race yields the `TYPE_CHANGED` sentinel.
    pub fn pipe_len(&mut self, records: &[KeyRecord]) -> Result<Vec<i64>, ClientError> {
        let cmds: Vec<Command> = records
            .iter()
            .map(|r| Command::new(r.value_type.len_command()).arg(r.key.clone()))
            .collect();
        self.pipe_raw(&cmds)?
            .into_iter()
            .map(|slot| match slot {
                PipeSlot::Reply(reply) => reply.into_int("len"),
                PipeSlot::WrongType => Ok(TYPE_CHANGED),
            })
            .collect()
    }

    /// `TTL` per key; true when the reply says the key is already gone
    /// (expired or deleted) on this side.
    pub fn pipe_ttl(&mut self, records: &[KeyRecord]) -> Result<Vec<bool>, ClientError> {
        let cmds: Vec<Command> = records
            .iter()
            .map(|r| Command::new("TTL").arg(r.key.clone()))
            .collect();
        self.pipe_raw(&cmds)?
            .into_iter()
            .map(|slot| match slot {
                // -2 (gone) on current servers; 0 on older ones. -1 means
                // "exists, no expiry" and must not count as expired.
                PipeSlot::Reply(reply) => Ok(matches!(reply.into_int("TTL")?, 0 | -2)),
                PipeSlot::WrongType => Ok(false),
            })
            .collect()
    }

    /// Whole-value fetch per key, dispatched on the key's type:
    /// `GET` / `HGETALL` / `LRANGE 0 -1` / `SMEMBERS` / `ZRANGE 0 -1
    /// WITHSCORES`.
    pub fn pipe_value(&mut self, records: &[KeyRecord]) -> Result<Vec<PipeSlot>, ClientError> {
        let cmds: Vec<Command> = records
            .iter()
            .map(|r| match r.value_type {
                ValueType::Hash => Command::new("HGETALL").arg(r.key.clone()),
                ValueType::List => Command::new("LRANGE").arg(r.key.clone()).arg_int(0).arg_int(-1),
                ValueType::Set => Command::new("SMEMBERS").arg(r.key.clone()),
                ValueType::Zset => Command::new("ZRANGE")
                    .arg(r.key.clone())
                    .arg_int(0)
                    .arg_int(-1)
                    .arg("WITHSCORES"),
                _ => Command::new("GET").arg(r.key.clone()),
            })
            .collect();
        self.pipe_raw(&cmds)
    }

    /// `SISMEMBER key member` per member: 0 or 1.
    pub fn pipe_sismember(
        &mut self,
        key: &[u8],
        members: &[Vec<u8>],
    ) -> Result<Vec<i64>, ClientError> {
        let cmds: Vec<Command> = members
            .iter()
            .map(|m| Command::new("SISMEMBER").arg(key.to_vec()).arg(m.clone()))
            .collect();
        self.pipe_raw(&cmds)?
            .into_iter()
            .map(|slot| match slot {
                PipeSlot::Reply(reply) => reply.into_int("SISMEMBER"),
                PipeSlot::WrongType => Ok(0),
            })
            .collect()
    }

    /// `ZSCORE key member` per member; `None` for a missing member.
    pub fn pipe_zscore(
        &mut self,
        key: &[u8],
        members: &[Vec<u8>],
    ) -> Result<Vec<Option<Vec<u8>>>, ClientError> {
        let cmds: Vec<Command> = members
            .iter()
            .map(|m| Command::new("ZSCORE").arg(key.to_vec()).arg(m.clone()))
            .collect();
        self.pipe_raw(&cmds)?
            .into_iter()
            .map(|slot| match slot {
                PipeSlot::Reply(reply) => reply.into_opt_bytes("ZSCORE"),
                PipeSlot::WrongType => Ok(None),
            })
            .collect()
    }

    /// Fetch a whole hash/set/zset through its `*SCAN` cursor, never
    /// holding more than one page of wire data plus the accumulated map.
    /// Set members map to empty values.
    pub fn scan_container(
        &mut self,
        record: &KeyRecord,
        batch: usize,
    ) -> Result<FxHashMap<Vec<u8>, Vec<u8>>, ClientError> {
        let scan_cmd = match record.value_type {
            ValueType::Hash => "HSCAN",
            ValueType::Set => "SSCAN",
            ValueType::Zset => "ZSCAN",
            other => {
                return Err(ClientError::UnexpectedReply {
                    command: "scan_container".to_string(),
                    message: format!("{other} is not a scannable container"),
                })
            }
        };

        let mut value = FxHashMap::default();
        let mut cursor: u64 = 0;
        loop {
            let cmd = Command::new(scan_cmd)
                .arg(record.key.clone())
                .arg_int(cursor as i64)
                .arg("COUNT")
                .arg_int(batch as i64);
            let (next, items) = self.do_command(&cmd)?.into_cursor_page(scan_cmd)?;

            match record.value_type {
                ValueType::Hash | ValueType::Zset => {
                    let mut iter = items.into_iter();
                    while let (Some(field), Some(val)) = (iter.next(), iter.next()) {
                        value.insert(field.into_bytes(scan_cmd)?, val.into_bytes(scan_cmd)?);
                    }
                }
                ValueType::Set => {
                    for member in items {
                        value.insert(member.into_bytes(scan_cmd)?, Vec::new());
                    }
                }
                _ => unreachable!("checked above"),
            }

            if next == 0 {
                return Ok(value);
            }
            cursor = next;
        }
    }
}

//! A single authenticated connection to one node.

use std::io::{BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::time::Duration;

use respdiff_core::{AuthCommand, ClientError};

use crate::codec::{decode_reply, encode_command};
use crate::resp::{Command, Reply};

/// One TCP connection speaking RESP. Holds separate buffered reader and
/// writer halves so pipelined sends can be flushed once and replies
/// drained in order.
pub struct Connection {
    addr: String,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    /// Dial `addr`. A zero timeout keeps the socket fully blocking.
    pub fn connect(addr: &str, timeout_ms: u64) -> Result<Self, ClientError> {
        let stream = if timeout_ms == 0 {
            TcpStream::connect(addr)
        } else {
            let timeout = Duration::from_millis(timeout_ms);
            let sock_addr = addr
                .parse()
                .map_err(|_| ClientError::Io {
                    addr: addr.to_string(),
                    message: "unparseable socket address".to_string(),
                })?;
            TcpStream::connect_timeout(&sock_addr, timeout).and_then(|s| {
                s.set_read_timeout(Some(timeout))?;
                s.set_write_timeout(Some(timeout))?;
                Ok(s)
            })
        }
        .map_err(|e| ClientError::Io {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;

        stream.set_nodelay(true).ok();
        let reader = BufReader::new(stream.try_clone().map_err(|e| ClientError::Io {
            addr: addr.to_string(),
            message: e.to_string(),
        })?);
        let writer = BufWriter::new(stream);

        Ok(Self {
            addr: addr.to_string(),
            reader,
            writer,
        })
    }

    /// Dial, then authenticate and select the logical database as needed.
    /// `db` is ignored by cluster nodes (callers pass 0 there).
    pub fn open(
        addr: &str,
        timeout_ms: u64,
        password: Option<&str>,
        auth_command: AuthCommand,
        db: Option<i32>,
    ) -> Result<Self, ClientError> {
        let mut conn = Self::connect(addr, timeout_ms)?;
        if let Some(password) = password {
            conn.call(&Command::new(auth_command.command()).arg(password.as_bytes().to_vec()))?;
        }
        if let Some(db) = db {
            conn.call(&Command::new("SELECT").arg_int(db as i64))?;
        }
        Ok(conn)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Queue one command into the write buffer.
    pub fn send(&mut self, cmd: &Command) -> Result<(), ClientError> {
        encode_command(&mut self.writer, cmd).map_err(|e| ClientError::Io {
            addr: self.addr.clone(),
            message: e.to_string(),
        })
    }

    /// Push every queued command onto the wire.
    pub fn flush(&mut self) -> Result<(), ClientError> {
        self.writer.flush().map_err(|e| ClientError::Io {
            addr: self.addr.clone(),
            message: e.to_string(),
        })
    }

    /// Read one reply, in send order.
    pub fn receive(&mut self) -> Result<Reply, ClientError> {
        decode_reply(&mut self.reader, &self.addr)
    }

    /// One round trip.
    pub fn call(&mut self, cmd: &Command) -> Result<Reply, ClientError> {
        self.send(cmd)?;
        self.flush()?;
        self.receive()
    }

    /// Liveness probe.
    pub fn ping(&mut self) -> Result<(), ClientError> {
        let reply = self.call(&Command::new("PING"))?;
        let status = reply.into_status("PING")?;
        if status != "PONG" {
            return Err(ClientError::UnexpectedReply {
                command: "PING".to_string(),
                message: status,
            });
        }
        Ok(())
    }
}

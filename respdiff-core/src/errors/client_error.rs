//! Errors from the pipelined store client.

/// Errors that can occur while talking to an endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o error on {addr}: {message}")]
    Io { addr: String, message: String },

    #[error("connection to {addr} closed by peer")]
    Eof { addr: String },

    #[error("protocol violation from {addr}: {message}")]
    Protocol { addr: String, message: String },

    #[error("server error: {message}")]
    Server { message: String },

    #[error("unexpected reply to {command}: {message}")]
    UnexpectedReply { command: String, message: String },

    #[error("{attempts} connection attempts to {addr} failed, giving up: {last}")]
    RetriesExhausted {
        addr: String,
        attempts: u32,
        last: String,
    },

    #[error("no cluster node serves slot {slot}")]
    NoNodeForSlot { slot: u16 },
}

impl ClientError {
    /// Transport-level conditions that warrant reconnect-and-retry.
    /// Everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Io { .. } | ClientError::Eof { .. })
    }
}

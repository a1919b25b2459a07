//! RESP value model: the command builder and the decoded reply tree.

use respdiff_core::ClientError;

/// One request: a command name plus binary-safe arguments, encoded as a
/// RESP array of bulk strings.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: &'static str,
    pub args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_int(self, n: i64) -> Self {
        self.arg(n.to_string().into_bytes())
    }

    /// The argument used for cluster slot routing: the first one, except
    /// for commands whose key follows a subcommand. Keyless commands
    /// route to an arbitrary node.
    pub fn routing_key(&self) -> Option<&[u8]> {
        let index = match self.name {
            "XINFO" => 1,
            _ => 0,
        };
        self.args.get(index).map(|a| a.as_slice())
    }
}

/// A decoded reply. Error replies are not values; they surface as
/// [`ClientError::Server`] from the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Status(String),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
}

impl Reply {
    fn type_name(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::Int(_) => "int",
            Reply::Status(_) => "status",
            Reply::Bulk(_) => "bulk",
            Reply::Array(_) => "array",
        }
    }

    fn unexpected(&self, command: &str, wanted: &str) -> ClientError {
        ClientError::UnexpectedReply {
            command: command.to_string(),
            message: format!("wanted {wanted}, got {}", self.type_name()),
        }
    }

    pub fn into_int(self, command: &str) -> Result<i64, ClientError> {
        match self {
            Reply::Int(n) => Ok(n),
            other => Err(other.unexpected(command, "int")),
        }
    }

    /// Bulk or status payload as owned bytes; `Nil` is an empty payload.
    pub fn into_bytes(self, command: &str) -> Result<Vec<u8>, ClientError> {
        match self {
            Reply::Bulk(b) => Ok(b),
            Reply::Status(s) => Ok(s.into_bytes()),
            Reply::Nil => Ok(Vec::new()),
            other => Err(other.unexpected(command, "bulk")),
        }
    }

    /// Bulk payload, distinguishing `Nil` (absent) from empty.
    pub fn into_opt_bytes(self, command: &str) -> Result<Option<Vec<u8>>, ClientError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Bulk(b) => Ok(Some(b)),
            Reply::Status(s) => Ok(Some(s.into_bytes())),
            other => Err(other.unexpected(command, "bulk or nil")),
        }
    }

    pub fn into_status(self, command: &str) -> Result<String, ClientError> {
        match self {
            Reply::Status(s) => Ok(s),
            Reply::Bulk(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(other.unexpected(command, "status")),
        }
    }

    pub fn into_array(self, command: &str) -> Result<Vec<Reply>, ClientError> {
        match self {
            Reply::Array(items) => Ok(items),
            Reply::Nil => Ok(Vec::new()),
            other => Err(other.unexpected(command, "array")),
        }
    }

    /// A cursor reply: `[cursor-bulk, array-of-items]`.
    pub fn into_cursor_page(self, command: &str) -> Result<(u64, Vec<Reply>), ClientError> {
        let mut items = self.into_array(command)?;
        if items.len() != 2 {
            return Err(ClientError::UnexpectedReply {
                command: command.to_string(),
                message: format!("cursor page with {} elements", items.len()),
            });
        }
        let body = items.pop().expect("len checked").into_array(command)?;
        let cursor_bytes = items.pop().expect("len checked").into_bytes(command)?;
        let cursor = std::str::from_utf8(&cursor_bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ClientError::UnexpectedReply {
                command: command.to_string(),
                message: "unparseable cursor".to_string(),
            })?;
        Ok((cursor, body))
    }
}

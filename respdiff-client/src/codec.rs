//! RESP2 wire codec: command encoding and reply decoding over buffered
//! streams. Error replies decode to [`ClientError::Server`]; the stream
//! stays in sync afterwards, so pipelined reads can continue past them.

use std::io::{BufRead, Write};

use respdiff_core::ClientError;

use crate::resp::{Command, Reply};

/// Reply prefix marking a probe that raced a type change.
pub const WRONGTYPE_PREFIX: &str = "WRONGTYPE";

/// Encode one command as a RESP array of bulk strings.
pub fn encode_command(out: &mut impl Write, cmd: &Command) -> std::io::Result<()> {
    write!(out, "*{}\r\n", cmd.args.len() + 1)?;
    write!(out, "${}\r\n", cmd.name.len())?;
    out.write_all(cmd.name.as_bytes())?;
    out.write_all(b"\r\n")?;
    for arg in &cmd.args {
        write!(out, "${}\r\n", arg.len())?;
        out.write_all(arg)?;
        out.write_all(b"\r\n")?;
    }
    Ok(())
}

/// Decode exactly one reply.
///
/// `addr` only labels errors. An empty read means the peer closed the
/// connection ([`ClientError::Eof`]).
pub fn decode_reply(input: &mut impl BufRead, addr: &str) -> Result<Reply, ClientError> {
    let line = read_line(input, addr)?;
    let (marker, rest) = line.split_first().ok_or_else(|| protocol(addr, "empty reply line"))?;

    match marker {
        b'+' => Ok(Reply::Status(String::from_utf8_lossy(rest).into_owned())),
        b'-' => Err(ClientError::Server {
            message: String::from_utf8_lossy(rest).into_owned(),
        }),
        b':' => parse_int(rest, addr).map(Reply::Int),
        b'$' => {
            let len = parse_int(rest, addr)?;
            if len < 0 {
                return Ok(Reply::Nil);
            }
            let payload = read_exact_payload(input, len as usize, addr)?;
            Ok(Reply::Bulk(payload))
        }
        b'*' => {
            let len = parse_int(rest, addr)?;
            if len < 0 {
                return Ok(Reply::Nil);
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(decode_reply(input, addr)?);
            }
            Ok(Reply::Array(items))
        }
        other => Err(protocol(addr, &format!("unknown reply marker 0x{other:02x}"))),
    }
}

/// True if a server error reply is the wrong-type race, which pipelines
/// tolerate slot-by-slot instead of aborting.
pub fn is_wrong_type(err: &ClientError) -> bool {
    matches!(err, ClientError::Server { message } if message.starts_with(WRONGTYPE_PREFIX))
}

fn read_line(input: &mut impl BufRead, addr: &str) -> Result<Vec<u8>, ClientError> {
    let mut line = Vec::with_capacity(32);
    loop {
        let n = input
            .read_until(b'\n', &mut line)
            .map_err(|e| io_error(addr, e))?;
        if n == 0 {
            return Err(ClientError::Eof {
                addr: addr.to_string(),
            });
        }
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(line);
        }
        if line.ends_with(b"\n") {
            return Err(protocol(addr, "bare LF in reply"));
        }
        // read_until stopped without a newline: only possible at EOF
    }
}

fn read_exact_payload(
    input: &mut impl BufRead,
    len: usize,
    addr: &str,
) -> Result<Vec<u8>, ClientError> {
    let mut payload = vec![0u8; len + 2];
    std::io::Read::read_exact(input, &mut payload).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ClientError::Eof {
                addr: addr.to_string(),
            }
        } else {
            io_error(addr, e)
        }
    })?;
    if &payload[len..] != b"\r\n" {
        return Err(protocol(addr, "bulk payload missing CRLF terminator"));
    }
    payload.truncate(len);
    Ok(payload)
}

fn parse_int(bytes: &[u8], addr: &str) -> Result<i64, ClientError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol(addr, &format!("bad integer `{}`", String::from_utf8_lossy(bytes))))
}

fn protocol(addr: &str, message: &str) -> ClientError {
    ClientError::Protocol {
        addr: addr.to_string(),
        message: message.to_string(),
    }
}

fn io_error(addr: &str, e: std::io::Error) -> ClientError {
    ClientError::Io {
        addr: addr.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn decode(bytes: &[u8]) -> Result<Reply, ClientError> {
        let mut reader = BufReader::new(bytes);
        decode_reply(&mut reader, "test")
    }

    #[test]
    fn test_encode_command() {
        let mut out = Vec::new();
        encode_command(&mut out, &Command::new("GET").arg(b"key".to_vec())).unwrap();
        assert_eq!(out, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn test_decode_simple_types() {
        assert_eq!(decode(b"+OK\r\n").unwrap(), Reply::Status("OK".into()));
        assert_eq!(decode(b":42\r\n").unwrap(), Reply::Int(42));
        assert_eq!(decode(b"$3\r\nfoo\r\n").unwrap(), Reply::Bulk(b"foo".to_vec()));
        assert_eq!(decode(b"$-1\r\n").unwrap(), Reply::Nil);
        assert_eq!(decode(b"$0\r\n\r\n").unwrap(), Reply::Bulk(Vec::new()));
    }

    #[test]
    fn test_decode_nested_array() {
        let reply = decode(b"*2\r\n$1\r\na\r\n*1\r\n:7\r\n").unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Bulk(b"a".to_vec()),
                Reply::Array(vec![Reply::Int(7)]),
            ])
        );
    }

    #[test]
    fn test_error_reply_surfaces_and_classifies() {
        let err = decode(b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n")
            .unwrap_err();
        assert!(is_wrong_type(&err));

        let err = decode(b"-ERR unknown command\r\n").unwrap_err();
        assert!(!is_wrong_type(&err));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_eof_is_transient() {
        let err = decode(b"").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_binary_safe_bulk() {
        let reply = decode(b"$4\r\n\x00\xff\r\n\r\n").unwrap();
        assert_eq!(reply, Reply::Bulk(vec![0x00, 0xff, b'\r', b'\n']));
    }
}

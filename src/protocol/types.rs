//! Reply Frames
//!
//! Server replies use the RESP wire format:
//!
//! | Prefix | Frame          | Example            |
//! |--------|----------------|--------------------|
//! | `+`    | simple string  | `+OK\r\n`          |
//! | `-`    | error          | `-ERR no key\r\n`  |
//! | `:`    | integer        | `:3\r\n`           |
//! | `$`    | bulk string    | `$5\r\nhello\r\n`  |
//! | `$-1`  | null           | `$-1\r\n`          |
//! | `*`    | array          | `*1\r\n:1\r\n`     |

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

pub const CRLF: &[u8] = b"\r\n";

/// A reply sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// Binary-safe payload, used for stored values
    BulkString(Bytes),
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(message.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Encodes the frame onto the end of `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => put_line(buf, b'+', s.as_bytes()),
            RespValue::Error(message) => {
                // A line break would end the frame early
                let flat = message.replace(['\r', '\n'], " ");
                put_line(buf, b'-', flat.as_bytes());
            }
            RespValue::Integer(n) => put_line(buf, b':', n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                put_line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => put_line(buf, b'$', b"-1"),
            RespValue::Array(items) => {
                put_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }

    /// Encodes the frame into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{s}"),
            RespValue::Error(message) => write!(f, "(error) {message}"),
            RespValue::Integer(n) => write!(f, "(integer) {n}"),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{s}\""),
                Err(_) => write!(f, "({} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(items) => write!(f, "({} items)", items.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(RespValue::ok().to_bytes(), Bytes::from("+OK\r\n"));
        assert_eq!(RespValue::Integer(-7).to_bytes(), Bytes::from(":-7\r\n"));
        assert_eq!(RespValue::Null.to_bytes(), Bytes::from("$-1\r\n"));
        assert_eq!(
            RespValue::bulk("hello").to_bytes(),
            Bytes::from("$5\r\nhello\r\n")
        );
    }

    #[test]
    fn test_encode_binary_bulk() {
        let value = RespValue::bulk(vec![0u8, b'\r', b'\n', 255]);
        assert_eq!(value.to_bytes(), Bytes::from(&b"$4\r\n\x00\r\n\xff\r\n"[..]));
    }

    #[test]
    fn test_error_stays_on_one_line() {
        let value = RespValue::error("ERR bad\r\nthing");
        assert_eq!(value.to_bytes(), Bytes::from("-ERR bad  thing\r\n"));
    }

    #[test]
    fn test_encode_array() {
        let value = RespValue::Array(vec![RespValue::bulk("a"), RespValue::Null]);
        assert_eq!(value.to_bytes(), Bytes::from("*2\r\n$1\r\na\r\n$-1\r\n"));
    }
}

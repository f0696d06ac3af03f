//! Incremental Request Parser
//!
//! Clients send commands either as RESP arrays of bulk strings or as inline
//! text lines:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhello\r\n      (multibulk)
//! SET k hello\r\n                                     (inline)
//! ```
//!
//! [`parse_request`] looks at the front of a connection buffer and returns:
//!
//! - `Ok(Some((request, consumed)))`: a full command; drop `consumed` bytes
//! - `Ok(None)`: the command is incomplete, read more
//! - `Err(e)`: the stream is not a valid command sequence

use bytes::Bytes;
use thiserror::Error;

/// Errors from malformed request framing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected '{expected}', found byte {found:#04x}")]
    UnexpectedByte { expected: char, found: u8 },

    #[error("invalid length line {0:?}")]
    InvalidLength(String),

    #[error("bulk argument of {size} bytes exceeds limit of {max} bytes")]
    ArgumentTooLarge { size: usize, max: usize },

    #[error("command has {count} arguments, limit is {max}")]
    TooManyArguments { count: usize, max: usize },

    #[error("bulk argument missing trailing CRLF")]
    MissingTerminator,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest single argument accepted.
pub const MAX_ARGUMENT_SIZE: usize = 512 * 1024 * 1024;

/// Largest argument count accepted.
pub const MAX_ARGUMENTS: usize = 1024 * 1024;

/// A parsed command: the name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub args: Vec<Bytes>,
}

impl Request {
    /// Upper-cased command name, if the request has one.
    pub fn name(&self) -> Option<String> {
        let first = self.args.first()?;
        Some(String::from_utf8_lossy(first).to_ascii_uppercase())
    }
}

/// Parses one request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    match buf.first() {
        None => Ok(None),
        Some(b'*') => parse_multibulk(buf),
        Some(_) => parse_inline(buf),
    }
}

fn parse_multibulk(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    let Some((count, mut pos)) = read_length(buf, 0)? else {
        return Ok(None);
    };
    // `*-1` and `*0` carry no command
    if count <= 0 {
        return Ok(Some((Request { args: Vec::new() }, pos)));
    }
    let count = count as usize;
    if count > MAX_ARGUMENTS {
        return Err(ParseError::TooManyArguments {
            count,
            max: MAX_ARGUMENTS,
        });
    }

    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match buf.get(pos) {
            None => return Ok(None),
            Some(b'$') => {}
            Some(&found) => {
                return Err(ParseError::UnexpectedByte {
                    expected: '$',
                    found,
                })
            }
        }
        let Some((len, data_start)) = read_length(buf, pos)? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(ParseError::InvalidLength(len.to_string()));
        }
        let len = len as usize;
        if len > MAX_ARGUMENT_SIZE {
            return Err(ParseError::ArgumentTooLarge {
                size: len,
                max: MAX_ARGUMENT_SIZE,
            });
        }

        let end = data_start + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(ParseError::MissingTerminator);
        }
        args.push(Bytes::copy_from_slice(&buf[data_start..end]));
        pos = end + 2;
    }

    Ok(Some((Request { args }, pos)))
}

/// Reads `<prefix><integer>\r\n` starting at `start`, returning the integer
/// and the offset just past the line.
fn read_length(buf: &[u8], start: usize) -> ParseResult<Option<(i64, usize)>> {
    let Some(line_end) = find_crlf(&buf[start..]) else {
        return Ok(None);
    };
    let digits = &buf[start + 1..start + line_end];
    let text = String::from_utf8_lossy(digits);
    let value = text
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidLength(text.to_string()))?;
    Ok(Some((value, start + line_end + 2)))
}

fn parse_inline(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    let Some(line_end) = find_crlf(buf) else {
        return Ok(None);
    };
    let args = buf[..line_end]
        .split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();
    Ok(Some((Request { args }, line_end + 2)))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(request: &Request) -> Vec<&[u8]> {
        request.args.iter().map(|a| a.as_ref()).collect()
    }

    #[test]
    fn test_parse_multibulk() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhello\r\n";
        let (request, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(args(&request), vec![&b"SET"[..], b"k", b"hello"]);
        assert_eq!(request.name().as_deref(), Some("SET"));
    }

    #[test]
    fn test_parse_binary_argument() {
        let input = b"*2\r\n$3\r\nSET\r\n$4\r\n\r\n\x00\xff\r\n";
        let (request, _) = parse_request(input).unwrap().unwrap();
        assert_eq!(request.args[1].as_ref(), b"\r\n\x00\xff");
    }

    #[test]
    fn test_parse_incomplete() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nna";
        for end in 0..input.len() {
            assert!(parse_request(&input[..end]).unwrap().is_none(), "{end}");
        }
    }

    #[test]
    fn test_parse_pipelined() {
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (_, consumed) = parse_request(input).unwrap().unwrap();
        assert_eq!(consumed, 14);
        let (request, rest) = parse_request(&input[consumed..]).unwrap().unwrap();
        assert_eq!(request.name().as_deref(), Some("PING"));
        assert_eq!(consumed + rest, input.len());
    }

    #[test]
    fn test_parse_inline() {
        let (request, consumed) = parse_request(b"get  mykey\r\n").unwrap().unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(request.name().as_deref(), Some("GET"));
        assert_eq!(args(&request), vec![&b"get"[..], b"mykey"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_request(b"*1\r\n:5\r\n"),
            Err(ParseError::UnexpectedByte { expected: '$', .. })
        ));
        assert!(matches!(
            parse_request(b"*x\r\n"),
            Err(ParseError::InvalidLength(_))
        ));
        assert_eq!(
            parse_request(b"*1\r\n$2\r\nabc\r\n"),
            Err(ParseError::MissingTerminator)
        );
    }

    #[test]
    fn test_parse_empty_array() {
        let (request, consumed) = parse_request(b"*0\r\n").unwrap().unwrap();
        assert!(request.args.is_empty());
        assert_eq!(consumed, 4);
        assert!(request.name().is_none());
    }
}

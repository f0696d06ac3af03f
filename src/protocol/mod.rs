//! Wire Protocol
//!
//! The network front-end speaks a RESP compatible dialect, so `redis-cli`
//! and other RESP clients can talk to a VaultKV server.
//!
//! - `parser`: incremental parsing of client requests
//! - `types`: reply frames and their encoding
//!
//! ```
//! use vaultkv::protocol::{parse_request, RespValue};
//!
//! let (request, consumed) = parse_request(b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(request.name().as_deref(), Some("GET"));
//! assert_eq!(consumed, 20);
//!
//! assert_eq!(&RespValue::ok().to_bytes()[..], b"+OK\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_request, ParseError, ParseResult, Request};
pub use types::RespValue;

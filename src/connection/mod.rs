//! Client Connections
//!
//! One tokio task per accepted socket. The task buffers incoming bytes,
//! parses pipelined requests, hands each to the [`CommandHandler`] on the
//! blocking pool and writes replies back in request order.
//!
//! ```ignore
//! use vaultkv::commands::CommandHandler;
//! use vaultkv::connection::{handle_connection, ConnectionStats};
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, CommandHandler::new(store.clone()), stats));
//! ```
//!
//! [`CommandHandler`]: crate::commands::CommandHandler

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};

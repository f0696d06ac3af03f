//! Command Layer
//!
//! Sits between the connection handler and the storage engine:
//!
//! ```text
//! Request ──> CommandHandler::execute ──> Store ──> RespValue
//! ```
//!
//! The store knows nothing about commands or replies; all translation
//! between the two happens here.

pub mod handler;

pub use handler::CommandHandler;

//! Connection Handler
//!
//! Each client connection runs in its own tokio task:
//!
//! ```text
//!  ┌──────────────┐    ┌──────────────┐    ┌──────────────────────┐
//!  │ read socket  │───>│ parse request│───>│ spawn_blocking:      │
//!  │ into buffer  │    │ (pipelined)  │    │ CommandHandler       │
//!  └──────────────┘    └──────────────┘    └──────────┬───────────┘
//!         ▲                                           │
//!         │              ┌──────────────┐             │
//!         └──────────────│ write reply  │<────────────┘
//!                        └──────────────┘
//! ```
//!
//! Store operations block on disk I/O, so they never run on the async
//! worker threads.

use crate::commands::CommandHandler;
use crate::protocol::{parse_request, ParseError, Request, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Buffered request bytes allowed before a client is dropped.
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("client closed the connection mid-request")]
    UnexpectedEof,

    #[error("request buffer exceeded {0} bytes")]
    BufferFull(usize),

    #[error("command task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Per-connection state.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            stats,
        }
    }

    /// Serves the client until it disconnects, sends `QUIT` or errors.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");
        let result = self.serve().await;
        self.stats.closed();

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(request) = self.next_request()? {
                let quit = request.name().as_deref() == Some("QUIT");
                let reply = self.dispatch(request).await?;
                self.send(&reply).await?;
                if quit {
                    self.stream.flush().await?;
                    return Ok(());
                }
            }
            self.stream.flush().await?;

            if !self.fill_buffer().await? {
                return Ok(());
            }
        }
    }

    fn next_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        loop {
            let Some((request, consumed)) = parse_request(&self.buffer)? else {
                return Ok(None);
            };
            self.buffer.advance(consumed);
            // Blank inline lines and empty arrays are skipped
            if !request.args.is_empty() {
                trace!(client = %self.addr, consumed = consumed, "Parsed request");
                return Ok(Some(request));
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<RespValue, ConnectionError> {
        let commands = self.commands.clone();
        let reply = tokio::task::spawn_blocking(move || commands.execute(request)).await?;
        self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);
        Ok(reply)
    }

    /// Reads more bytes. Returns false on a clean disconnect.
    async fn fill_buffer(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull(MAX_BUFFER_SIZE));
        }
        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return if self.buffer.is_empty() {
                Ok(false)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }
        self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(true)
    }

    async fn send(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.to_bytes();
        self.stream.write_all(&bytes).await?;
        self.stats
            .bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Runs a [`ConnectionHandler`] to completion, logging how it ended.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    if let Err(e) = ConnectionHandler::new(stream, addr, commands, stats)
        .run()
        .await
    {
        info!(client = %addr, error = %e, "Connection closed with error");
    }
}

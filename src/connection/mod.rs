//! Connection Management Module
//!
//! Peer connections, the shared registry both the accept loop and outbound
//! connect populate, and the per-connection handler tasks.

pub mod handler;
pub mod manager;
pub mod registry;

pub use handler::ConnectionHandler;
pub use manager::{AcceptFailures, ConnectionManager};
pub use registry::ConnectionRegistry;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Process-unique connection identifier, issued once and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which side opened the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// One live peer link.
///
/// The read half of the socket belongs to the connection's handler task; the
/// write half lives here so `send` can reach it. Closing only cancels the
/// close token, the handler reacts by dropping the socket and deregistering.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    direction: Direction,
    established_at: Instant,
    writer: Mutex<Option<OwnedWriteHalf>>,
    close: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        direction: Direction,
        writer: OwnedWriteHalf,
    ) -> Self {
        Self {
            id,
            remote_addr,
            direction,
            established_at: Instant::now(),
            writer: Mutex::new(Some(writer)),
            close: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_ip(&self) -> String {
        self.remote_addr.ip().to_string()
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_addr.port()
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    /// Request closure. Safe to call any number of times from any task.
    pub fn close(&self) {
        if !self.close.is_cancelled() {
            debug!("Close requested for connection {} ({})", self.id, self.remote_addr);
        }
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once closure has been requested
    pub async fn closed(&self) {
        self.close.cancelled().await
    }

    /// Write raw bytes to the peer, no framing. A close request aborts a
    /// pending write.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut slot = self.writer.lock().await;
        let result = match slot.as_mut() {
            Some(writer) if !self.is_closed() => tokio::select! {
                biased;
                _ = self.close.cancelled() => Err(closed_error()),
                result = writer.write_all(bytes) => result,
            },
            _ => Err(closed_error()),
        };

        // cleanup skips the writer while a write holds the lock
        if self.is_closed() {
            slot.take();
        }
        result
    }

    /// Shut down and drop the write half
    pub(crate) async fn release_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Drop the write half without waiting; used from synchronous cleanup.
    /// If a write holds the lock, that write drops the half once it sees the
    /// close request.
    pub(crate) fn try_release_writer(&self) {
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            remote_ip: self.remote_ip(),
            remote_port: self.remote_port(),
            direction: self.direction,
            age_ms: self.established_at.elapsed().as_millis() as u64,
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection already closed")
}

/// Point-in-time description of a connection, used for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_ip: String,
    pub remote_port: u16,
    pub direction: Direction,
    pub age_ms: u64,
}

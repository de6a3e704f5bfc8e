//! Connection Errors
//!
//! Typed failures returned by the connection manager. Everything up to
//! `SendFailed` is caused by user input and is handed back to the console for
//! display; the accept variants only ever surface from the accept loop.

use std::io;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Result of a connection manager operation
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Errors produced by connect, terminate, send and the accept loop
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A live connection to this endpoint is already registered
    #[error("connection to {ip}:{port} already exists")]
    ConnectionExists { ip: String, port: u16 },

    /// Outbound connect aimed at our own listening port
    #[error("self connections not allowed (port {port} is our listening port)")]
    SelfConnection { port: u16 },

    /// Destination is not an IP address
    #[error("invalid ip given: {destination}:{port}")]
    InvalidAddress { destination: String, port: u16 },

    /// Dial failed or did not complete within the dial timeout
    #[error("dial request to {destination}:{port} failed or timed out")]
    DialTimeout { destination: String, port: u16 },

    /// No live connection carries this id
    #[error("{0} is not a valid connection id, use list to see all current connections")]
    InvalidConnectionId(ConnectionId),

    /// Message exceeds the per-send limit
    #[error("message is too long: max length is {max} bytes, your message is {len} bytes")]
    MessageTooLong { len: usize, max: usize },

    /// Writing to the peer failed
    #[error("failed to send message to connection {id}: {source}")]
    SendFailed {
        id: ConnectionId,
        #[source]
        source: io::Error,
    },

    /// Transient accept failure, counted against the listener's error budget
    #[error("accept failed: {0}")]
    AcceptFailure(#[source] io::Error),

    /// Too many consecutive accept failures; the listener has been closed
    #[error("too many accept errors ({failures} in a row), no longer accepting new connections")]
    ListenerFatal { failures: u32 },
}

impl ConnectionError {
    /// Whether the error was caused by user input rather than the listener
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            ConnectionError::AcceptFailure(_) | ConnectionError::ListenerFatal { .. }
        )
    }
}

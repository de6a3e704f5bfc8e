//! Chatty Library
//!
//! Peer-to-peer TCP chat. A single process listens for inbound peers and
//! dials outbound ones at the same time; every live link is kept in one
//! shared registry that the interactive console lists, terminates, writes to
//! and tears down on exit.

pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod metrics;
pub mod net;
pub mod output;
pub mod shutdown;

pub use config::Config;
pub use connection::{ConnectionId, ConnectionManager, ConnectionRegistry};
pub use console::Console;
pub use error::ConnectionError;
pub use output::{BufferedOutput, Output, StdOutput};
pub use shutdown::ShutdownCoordinator;

/// Common error type for application plumbing
pub type Result<T> = anyhow::Result<T>;

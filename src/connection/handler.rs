//! Connection Handler
//!
//! Owns one connection's read half for the lifetime of the link and prints
//! whatever the peer sends. On every exit path the connection deregisters
//! itself and its socket is closed.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, instrument, warn};

use super::{Connection, ConnectionRegistry};
use crate::metrics::Metrics;
use crate::output::Output;

/// Passive read loop for one connection
pub struct ConnectionHandler {
    connection: Arc<Connection>,
    reader: OwnedReadHalf,
    registry: Arc<ConnectionRegistry>,
    output: Arc<dyn Output>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
}

/// Deregisters and closes the connection when dropped, including when the
/// handler task panics or is aborted.
struct RegistrationGuard {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let id = self.connection.id();
        if self.registry.remove(id).is_some() {
            self.metrics.connection_removed();
        }
        self.connection.close();
        self.connection.try_release_writer();
        info!(
            "Connection {} from {} closed after {:?}",
            id,
            self.connection.remote_addr(),
            self.connection.established_at().elapsed()
        );
    }
}

impl ConnectionHandler {
    pub fn new(
        connection: Arc<Connection>,
        reader: OwnedReadHalf,
        registry: Arc<ConnectionRegistry>,
        output: Arc<dyn Output>,
        metrics: Arc<Metrics>,
        buffer_size: usize,
    ) -> Self {
        Self {
            connection,
            reader,
            registry,
            output,
            metrics,
            buffer_size,
        }
    }

    /// Read until the peer hangs up, a read fails, or closure is requested
    #[instrument(skip(self), fields(connection_id = %self.connection.id(), addr = %self.connection.remote_addr()))]
    pub async fn run(mut self) {
        let _guard = RegistrationGuard {
            connection: Arc::clone(&self.connection),
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
        };

        let mut buffer = BytesMut::with_capacity(self.buffer_size);

        loop {
            buffer.clear();

            tokio::select! {
                biased;

                _ = self.connection.closed() => {
                    debug!("Close requested, leaving read loop");
                    break;
                }
                result = self.reader.read_buf(&mut buffer) => {
                    match result {
                        Ok(0) => {
                            self.output.out(&format!(
                                "\nConnection {} ({}:{}) closed by peer\n",
                                self.connection.id(),
                                self.connection.remote_ip(),
                                self.connection.remote_port()
                            ));
                            break;
                        }
                        Ok(n) => {
                            self.metrics.bytes_received(n);
                            self.print_message(&buffer);
                        }
                        Err(e) => {
                            warn!("Read from connection {} failed: {}", self.connection.id(), e);
                            break;
                        }
                    }
                }
            }
        }

        self.connection.release_writer().await;
    }

    fn print_message(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_end_matches(['\r', '\n']);
        self.output.out(&format!(
            "\nMessage received from {}\nSender's Port: {}\nMessage: \"{}\"\n",
            self.connection.remote_ip(),
            self.connection.remote_port(),
            text
        ));
    }
}

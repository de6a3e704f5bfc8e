//! Connection Manager Implementation
//!
//! Listens and dials at the same time. Inbound sockets from the accept loop
//! and outbound sockets from `connect` go through the same registration
//! routine, after which each connection is served by its own handler task.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Connection, ConnectionHandler, ConnectionId, ConnectionInfo, ConnectionRegistry, Direction};
use crate::config::Config;
use crate::error::{ConnectionError, ConnectionResult};
use crate::metrics::Metrics;
use crate::output::Output;
use crate::shutdown::ShutdownCoordinator;
use crate::Result;

/// Source of inbound sockets for the accept loop
pub trait Acceptor: Send {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Consecutive accept failure budget. Any successful accept resets it.
#[derive(Debug)]
pub struct AcceptFailures {
    consecutive: u32,
    limit: u32,
}

impl AcceptFailures {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Count one failure; true once the budget is exceeded
    pub fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive > self.limit
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Manages the listener, outbound dials and the shared connection registry
pub struct ConnectionManager {
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    output: Arc<dyn Output>,
    metrics: Arc<Metrics>,
    shutdown: ShutdownCoordinator,
    /// Taken by the accept loop once it starts
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    listener_closed: CancellationToken,
}

impl ConnectionManager {
    /// Bind the listener and create a manager around a fresh registry
    pub async fn bind(
        config: Arc<Config>,
        output: Arc<dyn Output>,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self> {
        let ip = config
            .server
            .bind_ip
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let bind_addr = SocketAddr::new(ip, config.server.port);

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            anyhow::anyhow!("Failed to bind listener to {}: {}", bind_addr, e)
        })?;
        let local_addr = listener.local_addr()?;
        info!("Successfully bound to {}", local_addr);

        Ok(Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            output,
            metrics: Arc::new(Metrics::new()),
            shutdown,
            listener: Mutex::new(Some(listener)),
            local_addr,
            listener_closed: CancellationToken::new(),
        })
    }

    /// Run the accept loop on its own task
    pub fn spawn_accept_loop(self: &Arc<Self>) -> JoinHandle<ConnectionResult<()>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.accept_connections().await })
    }

    /// Accept inbound connections until the listener is closed.
    ///
    /// Closing the listener is the normal way to stop and returns `Ok`. More
    /// than `max_accept_errors` consecutive failures close the listener and
    /// return `ListenerFatal`; outbound connects and existing connections are
    /// unaffected.
    pub async fn accept_connections(self: Arc<Self>) -> ConnectionResult<()> {
        let listener = match self.listener.lock().ok().and_then(|mut slot| slot.take()) {
            Some(listener) => listener,
            None => {
                debug!("Listener already taken or closed, accept loop not started");
                return Ok(());
            }
        };

        self.accept_from(listener).await
    }

    /// Drive the accept loop over any socket source
    pub(crate) async fn accept_from<A: Acceptor>(&self, mut acceptor: A) -> ConnectionResult<()> {
        info!("Starting connection acceptance loop on {}", self.local_addr);
        let mut failures = AcceptFailures::new(self.config.server.max_accept_errors);

        loop {
            let accepted = tokio::select! {
                biased;

                _ = self.listener_closed.cancelled() => {
                    info!("Listener closed, stopping connection acceptance");
                    return Ok(());
                }
                result = acceptor.accept() => result,
            };

            match accepted {
                Ok((stream, addr)) => {
                    failures.reset();
                    debug!("Accepted connection from {}", addr);
                    self.admit_inbound(stream, addr);
                }
                Err(e) => {
                    self.metrics.accept_failed();
                    let exceeded = failures.record();
                    let err = ConnectionError::AcceptFailure(e);
                    warn!(
                        "Error accepting connection on {}: {} ({} in a row)",
                        self.local_addr,
                        err,
                        failures.consecutive()
                    );

                    if exceeded {
                        self.listener_closed.cancel();
                        drop(acceptor);
                        let fatal = ConnectionError::ListenerFatal {
                            failures: failures.consecutive(),
                        };
                        error!("{}", fatal);
                        self.output.out_err(&format!("\n{}\n", fatal));
                        return Err(fatal);
                    }

                    self.output.out_err(&format!("\n{}\n", err));
                }
            }
        }
    }

    /// Register an accepted socket, refusing endpoints we are already connected to
    pub(crate) fn admit_inbound(&self, stream: TcpStream, addr: SocketAddr) {
        match self.register(stream, addr, Direction::Inbound) {
            Ok(_) => {}
            Err(ConnectionError::ConnectionExists { ip, port }) => {
                self.metrics.duplicate_rejected();
                warn!("Refusing connection from {}:{}, connection already exists", ip, port);
                self.output.out_err(&format!(
                    "\nRefusing connection from {}:{}! Connection already exists!\n",
                    ip, port
                ));
            }
            Err(e) => {
                warn!("Failed to register connection from {}: {}", addr, e);
            }
        }
    }

    /// Dial `destination:port` and register the resulting connection
    pub async fn connect(&self, destination: &str, port: u16) -> ConnectionResult<ConnectionId> {
        let parsed = destination.parse::<IpAddr>();

        if let Ok(ip) = parsed {
            if self.registry.contains_endpoint(&SocketAddr::new(ip, port)) {
                return Err(ConnectionError::ConnectionExists {
                    ip: ip.to_string(),
                    port,
                });
            }
        }

        if port == self.local_addr.port() {
            return Err(ConnectionError::SelfConnection { port });
        }

        let ip = parsed.map_err(|_| ConnectionError::InvalidAddress {
            destination: destination.to_string(),
            port,
        })?;
        let target = SocketAddr::new(ip, port);
        let dial_timeout = self.config.server.dial_timeout;

        info!("Dialing {} (timeout: {:?})", target, dial_timeout);
        let stream = match timeout(dial_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Dial to {} failed: {}", target, e);
                return Err(ConnectionError::DialTimeout {
                    destination: destination.to_string(),
                    port,
                });
            }
            Err(_) => {
                warn!("Dial to {} timed out after {:?}", target, dial_timeout);
                return Err(ConnectionError::DialTimeout {
                    destination: destination.to_string(),
                    port,
                });
            }
        };

        let remote_addr = stream.peer_addr().unwrap_or(target);
        let connection = self.register(stream, remote_addr, Direction::Outbound)?;
        Ok(connection.id())
    }

    /// Shared registration path for both directions: claim an id and the
    /// endpoint, tell the user, then hand the socket to a handler task.
    fn register(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        direction: Direction,
    ) -> ConnectionResult<Arc<Connection>> {
        let (reader, writer) = stream.into_split();
        let connection = self.registry.register(remote_addr, direction, writer)?;
        self.metrics.connection_registered(direction);

        info!(
            "Registered {} connection {} with {}",
            direction.as_str(),
            connection.id(),
            remote_addr
        );
        let notice = match direction {
            Direction::Inbound => "New incoming connection",
            Direction::Outbound => "New connection established",
        };
        self.output.out(&format!(
            "\n{}: {} | {}:{}\n",
            notice,
            connection.id(),
            connection.remote_ip(),
            connection.remote_port()
        ));

        let handler = ConnectionHandler::new(
            Arc::clone(&connection),
            reader,
            Arc::clone(&self.registry),
            Arc::clone(&self.output),
            Arc::clone(&self.metrics),
            self.config.server.read_buffer_size,
        );
        tokio::spawn(handler.run());

        Ok(connection)
    }

    /// Live connections in ascending id order
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.registry
            .snapshot()
            .iter()
            .map(|connection| connection.info())
            .collect()
    }

    /// Print the connection table
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let connections = self.snapshot();

        let mut table = String::from("id |  IP Address   | Port\n---+---------------+-----\n");
        for info in &connections {
            table.push_str(&format!(
                "{:>2} | {:<13} | {}\n",
                info.id, info.remote_ip, info.remote_port
            ));
        }
        self.output.out(&table);

        connections
    }

    /// Request closure of a connection. The handler removes it from the
    /// registry once it has observed the close, so the id may still be listed
    /// briefly after this returns.
    pub fn terminate(&self, id: ConnectionId) -> ConnectionResult<()> {
        let connection = self
            .registry
            .get(id)
            .ok_or(ConnectionError::InvalidConnectionId(id))?;

        info!("Terminating connection {} ({})", id, connection.remote_addr());
        connection.close();
        self.output.out(&format!(
            "Connection {} ({}:{}) terminated\n",
            id,
            connection.remote_ip(),
            connection.remote_port()
        ));
        Ok(())
    }

    /// Write `message` to a connection as raw bytes
    pub async fn send(&self, id: ConnectionId, message: &str) -> ConnectionResult<()> {
        let max = self.config.server.max_message_len;
        if message.len() > max {
            return Err(ConnectionError::MessageTooLong {
                len: message.len(),
                max,
            });
        }

        let connection = self
            .registry
            .get(id)
            .filter(|connection| !connection.is_closed())
            .ok_or(ConnectionError::InvalidConnectionId(id))?;

        connection
            .write(message.as_bytes())
            .await
            .map_err(|source| ConnectionError::SendFailed { id, source })?;

        self.metrics.message_sent();
        debug!("Sent {} bytes to connection {}", message.len(), id);
        self.output.out(&format!("Message sent to connection {}!\n", id));
        Ok(())
    }

    /// Close every connection and the listener, then signal shutdown.
    ///
    /// Does not wait for handlers to finish their cleanup; see
    /// [`ConnectionManager::wait_for_connections_to_close`].
    pub fn exit(&self) {
        self.output.out("Closing any established connections .. \n");

        for connection in self.registry.connections() {
            connection.close();
        }

        self.close_listener();
        self.output.out("Exiting program now .. bye!\n");
        self.shutdown.trigger();
    }

    /// Stop accepting new connections
    pub fn close_listener(&self) {
        if !self.listener_closed.is_cancelled() {
            info!("Closing listener on {}", self.local_addr);
        }
        self.listener_closed.cancel();
        // accept loop never started: drop the socket here
        if let Ok(mut slot) = self.listener.lock() {
            slot.take();
        }
    }

    pub fn is_listening(&self) -> bool {
        !self.listener_closed.is_cancelled()
    }

    /// Wait until every handler has deregistered, or the timeout passes
    pub async fn wait_for_connections_to_close(&self, shutdown_timeout: Duration) -> Result<()> {
        let start_time = Instant::now();

        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            self.registry.len(),
            shutdown_timeout
        );

        while !self.registry.is_empty() && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let remaining = self.registry.len();
        if remaining == 0 {
            info!("All connections closed gracefully in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                start_time.elapsed(),
                remaining
            );
        }

        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}

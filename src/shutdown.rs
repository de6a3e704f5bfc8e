//! Graceful Shutdown Handling
//!
//! Shutdown is requested either by the `exit` command or by SIGTERM / SIGINT.
//! Components subscribe to a broadcast signal instead of the process being
//! terminated underneath them, so handlers get a chance to deregister and
//! logs are flushed before `main` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::Result;

/// Shutdown coordinator shared by the command loop, the signal listener and
/// the connection manager
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
    /// How long to wait for handlers to finish cleanup
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            triggered: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown. Only the first call broadcasts.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
            return;
        }
        info!("Shutdown requested");
        // no subscribers is fine: nobody is waiting yet
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested, even if that happened before
    /// this call
    pub async fn wait(&self) {
        let mut shutdown_rx = self.subscribe();
        if self.is_triggered() {
            return;
        }
        let _ = shutdown_rx.recv().await;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.trigger();

        assert!(receiver.recv().await.is_ok());
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.trigger();
        coordinator.trigger();

        assert!(receiver.recv().await.is_ok());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.trigger();

        assert!(timeout(Duration::from_secs(1), coordinator.wait()).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_later_trigger() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let trigger = coordinator.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        assert!(timeout(Duration::from_secs(2), coordinator.wait()).await.is_ok());
    }
}

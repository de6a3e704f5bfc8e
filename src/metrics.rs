//! Metrics Collector
//!
//! Prometheus counters for the connection lifecycle, rendered on demand by
//! the `stats` console command.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::connection::Direction;
use crate::Result;

/// Collects and exports connection metrics
pub struct Metrics {
    registry: Registry,
    connections_total: IntCounterVec,
    active_connections: IntGauge,
    accept_failures_total: IntCounter,
    rejected_duplicates_total: IntCounter,
    messages_sent_total: IntCounter,
    bytes_received_total: IntCounter,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounterVec::new(
            Opts::new(
                "chatty_connections_total",
                "Total number of registered connections",
            ),
            &["direction"],
        )
        .expect("Failed to create connections_total counter");

        let active_connections = IntGauge::new(
            "chatty_active_connections",
            "Number of connections currently in the registry",
        )
        .expect("Failed to create active_connections gauge");

        let accept_failures_total = IntCounter::new(
            "chatty_accept_failures_total",
            "Accept calls that failed for a reason other than shutdown",
        )
        .expect("Failed to create accept_failures_total counter");

        let rejected_duplicates_total = IntCounter::new(
            "chatty_rejected_duplicates_total",
            "Connections refused because the endpoint was already connected",
        )
        .expect("Failed to create rejected_duplicates_total counter");

        let messages_sent_total = IntCounter::new(
            "chatty_messages_sent_total",
            "Messages written to peers",
        )
        .expect("Failed to create messages_sent_total counter");

        let bytes_received_total = IntCounter::new(
            "chatty_bytes_received_total",
            "Bytes read from peers",
        )
        .expect("Failed to create bytes_received_total counter");

        registry
            .register(Box::new(connections_total.clone()))
            .expect("Failed to register connections_total");
        registry
            .register(Box::new(active_connections.clone()))
            .expect("Failed to register active_connections");
        registry
            .register(Box::new(accept_failures_total.clone()))
            .expect("Failed to register accept_failures_total");
        registry
            .register(Box::new(rejected_duplicates_total.clone()))
            .expect("Failed to register rejected_duplicates_total");
        registry
            .register(Box::new(messages_sent_total.clone()))
            .expect("Failed to register messages_sent_total");
        registry
            .register(Box::new(bytes_received_total.clone()))
            .expect("Failed to register bytes_received_total");

        Self {
            registry,
            connections_total,
            active_connections,
            accept_failures_total,
            rejected_duplicates_total,
            messages_sent_total,
            bytes_received_total,
        }
    }

    pub fn connection_registered(&self, direction: Direction) {
        self.connections_total
            .with_label_values(&[direction.as_str()])
            .inc();
        self.active_connections.inc();
    }

    pub fn connection_removed(&self) {
        self.active_connections.dec();
    }

    pub fn accept_failed(&self) {
        self.accept_failures_total.inc();
    }

    pub fn duplicate_rejected(&self) {
        self.rejected_duplicates_total.inc();
    }

    pub fn message_sent(&self) {
        self.messages_sent_total.inc();
    }

    pub fn bytes_received(&self, bytes: usize) {
        self.bytes_received_total.inc_by(bytes as u64);
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.get()
    }

    pub fn rejected_duplicates(&self) -> u64 {
        self.rejected_duplicates_total.get()
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| anyhow::anyhow!("Failed to encode Prometheus metrics: {}", e))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_counters() {
        let metrics = Metrics::new();
        metrics.connection_registered(Direction::Inbound);
        metrics.connection_registered(Direction::Outbound);
        metrics.connection_removed();
        metrics.duplicate_rejected();

        assert_eq!(metrics.active_connections(), 1);
        assert_eq!(metrics.rejected_duplicates(), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("chatty_connections_total{direction=\"inbound\"} 1"));
        assert!(text.contains("chatty_connections_total{direction=\"outbound\"} 1"));
        assert!(text.contains("chatty_rejected_duplicates_total 1"));
    }
}

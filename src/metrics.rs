//! Ambient counters exposed per [`crate::reactor::EventCenter`].
//!
//! Scaled-down relative to the teacher's `metrics.rs` (no Prometheus
//! exporter, no HDR histograms — this crate has no latency-sensitive
//! surface worth histogramming): plain atomics, read with `Relaxed`
//! ordering since they're advisory counters, not synchronization points.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracking reactor-wide activity. One instance per
/// [`crate::reactor::EventCenter`], shared across all shards.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Streams currently adopted by some shard (`Connected` or `Connecting`).
    pub connections_active: AtomicU64,
    /// Sockets accepted by any listener over the engine's lifetime.
    pub accept_count: AtomicU64,
    /// Bytes appended to a recv buffer across all connections.
    pub bytes_received: AtomicU64,
    /// Bytes handed to a successful `sendv`/`writev` across all connections.
    pub bytes_sent: AtomicU64,
}

impl Metrics {
    /// A fresh, zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the counters into a plain value, for logging or export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_active: self.connections_active.load(Ordering::Relaxed),
            accept_count: self.accept_count.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Metrics`], cheap to pass around or serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// See [`Metrics::connections_active`].
    pub connections_active: u64,
    /// See [`Metrics::accept_count`].
    pub accept_count: u64,
    /// See [`Metrics::bytes_received`].
    pub bytes_received: u64,
    /// See [`Metrics::bytes_sent`].
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let metrics = Metrics::new();
        metrics.accept_count.fetch_add(3, Ordering::Relaxed);
        metrics.connections_active.fetch_add(1, Ordering::Relaxed);
        let snap = metrics.snapshot();
        assert_eq!(snap.accept_count, 3);
        assert_eq!(snap.connections_active, 1);
    }
}

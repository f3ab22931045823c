//! Receiver configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Data channel capacity between receiver and engine
pub const DATA_CHANNEL_CAPACITY: usize = 1024;

/// Receiver configuration
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Channel capacity; blocks are dropped when full
    pub channel_capacity: usize,

    /// Per-peer receive buffer
    pub recv_buffer_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DATA_CHANNEL_CAPACITY,
            recv_buffer_size: 65_536,
        }
    }
}

/// Ingestion metrics, shared by every peer of one receiver
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Total packets forwarded to the flow
    pub packets_received: AtomicU64,

    /// Total payload bytes forwarded
    pub bytes_received: AtomicU64,

    /// Packets dropped because the data channel was full
    pub packets_dropped: AtomicU64,

    /// Packets already delivered by another peer
    pub duplicates: AtomicU64,

    /// Sequence numbers never seen
    pub packets_lost: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self, count: u64) {
        self.packets_lost.fetch_add(count, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub packets_dropped: u64,
    pub duplicates: u64,
    pub packets_lost: u64,
}

impl MetricsSnapshot {
    /// Counter deltas since `earlier`
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.saturating_sub(earlier.packets_received),
            bytes_received: self.bytes_received.saturating_sub(earlier.bytes_received),
            packets_dropped: self.packets_dropped.saturating_sub(earlier.packets_dropped),
            duplicates: self.duplicates.saturating_sub(earlier.duplicates),
            packets_lost: self.packets_lost.saturating_sub(earlier.packets_lost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_delta() {
        let metrics = IngestionMetrics::new();
        metrics.record_received(100);
        let first = metrics.snapshot();
        metrics.record_received(50);
        metrics.record_lost(2);
        let delta = metrics.snapshot().since(&first);
        assert_eq!(delta.packets_received, 1);
        assert_eq!(delta.bytes_received, 50);
        assert_eq!(delta.packets_lost, 2);
    }
}

//! Operator-level input/output statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters the operator updates as pages move through it.
///
/// Network input is recorded per deserialized exchange page; processed
/// output is recorded per emitted merged page.
#[derive(Debug, Default)]
pub struct OperatorStats {
    network_input_bytes: AtomicU64,
    network_input_rows: AtomicU64,
    output_bytes: AtomicU64,
    output_rows: AtomicU64,
}

impl OperatorStats {
    /// New, zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one page received from an exchange.
    pub fn record_network_input(&self, bytes: u64, rows: u64) {
        self.network_input_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.network_input_rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record one merged page handed to the driver.
    pub fn record_output(&self, bytes: u64, rows: u64) {
        self.output_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.output_rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> OperatorStatsSnapshot {
        OperatorStatsSnapshot {
            network_input_bytes: self.network_input_bytes.load(Ordering::Relaxed),
            network_input_rows: self.network_input_rows.load(Ordering::Relaxed),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
            output_rows: self.output_rows.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`OperatorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperatorStatsSnapshot {
    /// Serialized bytes received from exchanges.
    pub network_input_bytes: u64,
    /// Rows received from exchanges.
    pub network_input_rows: u64,
    /// Bytes of merged output pages.
    pub output_bytes: u64,
    /// Rows of merged output pages.
    pub output_rows: u64,
}

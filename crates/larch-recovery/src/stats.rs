//! Shard recovery statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct DataRate {
    last_bytes_per_second: f64,
    total_restored_bytes: u64,
}

/// Counters the recovery subsystem updates as jobs run.
#[derive(Debug, Default)]
pub struct ShardRecoveryStats {
    background_shard_recovery: AtomicU64,
    active_shard_recovery: AtomicU64,
    shard_recovery_success: AtomicU64,
    shard_recovery_failure: AtomicU64,
    shard_recovery_backup_not_found: AtomicU64,
    corrupt_local_file: AtomicU64,
    corrupt_recovered_file: AtomicU64,
    rate: Mutex<DataRate>,
}

impl ShardRecoveryStats {
    /// New, zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// A background-priority recovery was enqueued.
    pub fn increment_background_shard_recovery(&self) {
        self.background_shard_recovery.fetch_add(1, Ordering::Relaxed);
    }

    /// An active-priority recovery was enqueued.
    pub fn increment_active_shard_recovery(&self) {
        self.active_shard_recovery.fetch_add(1, Ordering::Relaxed);
    }

    /// A recovery job completed successfully.
    pub fn increment_shard_recovery_success(&self) {
        self.shard_recovery_success.fetch_add(1, Ordering::Relaxed);
    }

    /// A recovery job failed.
    pub fn increment_shard_recovery_failure(&self) {
        self.shard_recovery_failure.fetch_add(1, Ordering::Relaxed);
    }

    /// The backup store had no copy of a requested shard.
    pub fn increment_shard_recovery_backup_not_found(&self) {
        self.shard_recovery_backup_not_found
            .fetch_add(1, Ordering::Relaxed);
    }

    /// A local file failed verification before restore.
    pub fn increment_corrupt_local_file(&self) {
        self.corrupt_local_file.fetch_add(1, Ordering::Relaxed);
    }

    /// A restored file failed verification after publication.
    pub fn increment_corrupt_recovered_file(&self) {
        self.corrupt_recovered_file.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the observed restore rate for one shard copy.
    pub fn record_data_rate(&self, bytes: u64, elapsed: Duration) {
        let rate = data_rate(bytes, elapsed);
        let mut guard = self.rate.lock();
        guard.last_bytes_per_second = rate;
        guard.total_restored_bytes += bytes;
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> ShardRecoveryStatsSnapshot {
        let rate = *self.rate.lock();
        ShardRecoveryStatsSnapshot {
            background_shard_recovery: self.background_shard_recovery.load(Ordering::Relaxed),
            active_shard_recovery: self.active_shard_recovery.load(Ordering::Relaxed),
            shard_recovery_success: self.shard_recovery_success.load(Ordering::Relaxed),
            shard_recovery_failure: self.shard_recovery_failure.load(Ordering::Relaxed),
            shard_recovery_backup_not_found: self
                .shard_recovery_backup_not_found
                .load(Ordering::Relaxed),
            corrupt_local_file: self.corrupt_local_file.load(Ordering::Relaxed),
            corrupt_recovered_file: self.corrupt_recovered_file.load(Ordering::Relaxed),
            last_restore_bytes_per_second: rate.last_bytes_per_second,
            total_restored_bytes: rate.total_restored_bytes,
        }
    }
}

/// Bytes per second, guarded against the degenerate zero-duration copy.
pub(crate) fn data_rate(bytes: u64, elapsed: Duration) -> f64 {
    let rate = bytes as f64 / elapsed.as_secs_f64();
    if rate.is_nan() || rate.is_infinite() {
        0.0
    } else {
        rate
    }
}

/// Point-in-time copy of [`ShardRecoveryStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardRecoveryStatsSnapshot {
    /// Background-priority recoveries enqueued.
    pub background_shard_recovery: u64,
    /// Active-priority recoveries enqueued.
    pub active_shard_recovery: u64,
    /// Jobs that completed successfully.
    pub shard_recovery_success: u64,
    /// Jobs that failed.
    pub shard_recovery_failure: u64,
    /// Jobs that found no backup copy.
    pub shard_recovery_backup_not_found: u64,
    /// Local files quarantined before restore.
    pub corrupt_local_file: u64,
    /// Restored files quarantined after publication.
    pub corrupt_recovered_file: u64,
    /// Rate of the most recent restore copy.
    pub last_restore_bytes_per_second: f64,
    /// Total bytes copied from backup.
    pub total_restored_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_rate_guards_degenerate_durations() {
        assert_eq!(data_rate(1000, Duration::ZERO), 0.0);
        assert_eq!(data_rate(0, Duration::ZERO), 0.0);
        let rate = data_rate(1000, Duration::from_secs(2));
        assert!((rate - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counters_show_up_in_snapshots() {
        let stats = ShardRecoveryStats::new();
        stats.increment_background_shard_recovery();
        stats.increment_shard_recovery_success();
        stats.record_data_rate(100, Duration::from_secs(1));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.background_shard_recovery, 1);
        assert_eq!(snapshot.shard_recovery_success, 1);
        assert_eq!(snapshot.total_restored_bytes, 100);
        assert!(snapshot.last_restore_bytes_per_second > 0.0);
    }
}

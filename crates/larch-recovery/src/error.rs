//! Error types for shard recovery.

use snafu::Snafu;

use crate::shard::ShardId;

/// Result type for recovery operations.
pub type Result<T, E = ShardRecoveryError> = std::result::Result<T, E>;

/// Errors that can occur while recovering shards.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ShardRecoveryError {
    /// The catalog has no record of the shard.
    #[snafu(display("shard does not exist in the catalog: {shard_id}"))]
    ShardUnknown {
        /// Shard that was requested.
        shard_id: ShardId,
    },

    /// The backup store has no copy of the shard.
    #[snafu(display("no backup file found for shard: {shard_id}"))]
    BackupNotFound {
        /// Shard that was requested.
        shard_id: ShardId,
    },

    /// The restored file failed integrity verification.
    #[snafu(display("backup is corrupt after read: {shard_id}"))]
    BackupCorruption {
        /// Shard whose restored file was quarantined.
        shard_id: ShardId,
    },

    /// A recovery step failed without an underlying I/O error.
    #[snafu(display("shard {shard_id} recovery failed: {message}"))]
    RecoveryFailed {
        /// Shard being recovered.
        shard_id: ShardId,
        /// What went wrong.
        message: String,
    },

    /// Staging copy, verification read, or atomic rename failed.
    #[snafu(display("shard {shard_id} recovery I/O failed: {message}: {source}"))]
    RecoveryIo {
        /// Shard being recovered.
        shard_id: ShardId,
        /// Step that failed.
        message: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Creating or inspecting the layout directories failed.
    #[snafu(display("recovery storage I/O failed: {message}: {source}"))]
    StorageIo {
        /// Operation that failed.
        message: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The shard catalog could not be read; transient during discovery.
    #[snafu(display("shard catalog error: {message}"))]
    Catalog {
        /// Failure reported by the catalog.
        message: String,
    },

    /// No backup store is configured on this node.
    #[snafu(display("no backup store is configured"))]
    BackupUnavailable,

    /// The recovery executor was shut down before the job completed.
    #[snafu(display("shard recovery is shut down"))]
    Shutdown,
}

//! Background shard recovery for Larch storage nodes.
//!
//! A storage node's local shard files can go missing or rot (partial
//! writes, disk faults, lost volumes). This crate continuously reconciles
//! the local filesystem against the cluster's shard catalog and restores
//! anything missing or size-mismatched from the backup store.
//!
//! # Architecture
//!
//! ```text
//! discovery loop (periodic, jittered)          read path
//!        |                                        |
//!        |  background-priority submits           |  active-priority submits
//!        v                                        v
//!              MissingShardQueue (dedup registry)
//!                          |
//!                          v
//!              PrioritizedExecutor (recovery_threads workers,
//!                                   active before background, FIFO ties)
//!                          |
//!                          v
//!              ShardRecoveryWorker
//!        backup -> staging -> verify -> atomic rename -> verify
//!                          |
//!                          +--> quarantine/<uuid>.corrupt on integrity failure
//! ```
//!
//! Identical requests collapse to one in-flight job per `(shard, priority)`
//! key; publication is an atomic rename, so racing restores of the same
//! shard are safe.

#![warn(missing_docs)]

pub mod backup;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod integrity;
pub mod layout;
pub mod manager;
pub mod queue;
pub mod shard;
pub mod stats;
pub mod worker;

pub use backup::{BackupStore, FileBackupStore};
pub use catalog::ShardCatalog;
pub use config::RecoveryConfig;
pub use error::{Result, ShardRecoveryError};
pub use layout::StorageLayout;
pub use manager::ShardRecoveryManager;
pub use queue::{JobFuture, MissingShardQueue, PrioritizedExecutor, RecoverShard};
pub use shard::{MissingShard, ShardId, ShardMetadata};
pub use stats::{ShardRecoveryStats, ShardRecoveryStatsSnapshot};
pub use worker::ShardRecoveryWorker;

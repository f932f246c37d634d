//! The shard recovery manager: discovery loop and on-demand entry point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use snafu::{OptionExt, ResultExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backup::BackupStore;
use crate::catalog::ShardCatalog;
use crate::config::RecoveryConfig;
use crate::error::{BackupUnavailableSnafu, Result, ShardUnknownSnafu, StorageIoSnafu};
use crate::layout::StorageLayout;
use crate::queue::{JobFuture, MissingShardQueue};
use crate::shard::{MissingShard, ShardId, ShardMetadata};
use crate::stats::{ShardRecoveryStats, ShardRecoveryStatsSnapshot};
use crate::worker::ShardRecoveryWorker;

/// Continuously reconciles local shard files against the catalog and
/// restores anything missing or size-mismatched from the backup store.
///
/// Without a backup store there is nothing to restore from; `start` is a
/// no-op and on-demand recovery fails fast.
pub struct ShardRecoveryManager {
    context: Option<Arc<RecoveryContext>>,
    config: RecoveryConfig,
    cancel: CancellationToken,
    started: AtomicBool,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<ShardRecoveryStats>,
}

impl ShardRecoveryManager {
    /// Wire a manager from its collaborators.
    pub fn new(
        layout: StorageLayout,
        backup: Option<Arc<dyn BackupStore>>,
        node_id: impl Into<String>,
        catalog: Arc<dyn ShardCatalog>,
        config: RecoveryConfig,
    ) -> Self {
        let stats = Arc::new(ShardRecoveryStats::new());
        let cancel = CancellationToken::new();
        let node_id = node_id.into();
        let context = backup.map(|backup| {
            let worker = Arc::new(ShardRecoveryWorker::new(
                layout.clone(),
                backup,
                Arc::clone(&stats),
            ));
            Arc::new(RecoveryContext {
                node_id,
                catalog,
                layout,
                queue: MissingShardQueue::new(worker, config.recovery_threads, cancel.child_token()),
                stats: Arc::clone(&stats),
            })
        });
        Self {
            context,
            config,
            cancel,
            started: AtomicBool::new(false),
            discovery_task: Mutex::new(None),
            stats,
        }
    }

    /// Start the background discovery loop. Idempotent; a no-op when no
    /// backup store is configured.
    pub async fn start(&self) -> Result<()> {
        let Some(context) = &self.context else {
            info!("no backup store configured; shard recovery disabled");
            return Ok(());
        };
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        context
            .layout
            .ensure_directories()
            .await
            .context(StorageIoSnafu {
                message: "failed to create storage layout directories".to_string(),
            })?;

        let task = tokio::spawn(run_discovery_loop(
            Arc::clone(context),
            self.config.discovery_interval(),
            self.cancel.child_token(),
        ));
        *self.discovery_task.lock() = Some(task);
        info!(
            node = %context.node_id,
            interval_secs = self.config.missing_shard_discovery_interval_secs,
            threads = self.config.recovery_threads,
            "shard recovery manager started"
        );
        Ok(())
    }

    /// Run one discovery pass out of band, without waiting for the next
    /// scheduled cycle.
    pub fn trigger_discovery(&self) {
        let Some(context) = &self.context else {
            return;
        };
        let context = Arc::clone(context);
        tokio::spawn(async move {
            if let Err(error) = context.enqueue_missing_shards().await {
                warn!(error = %error, "triggered shard discovery failed");
            }
        });
    }

    /// Actively recover one shard for a waiting reader.
    ///
    /// Fails immediately when the catalog has no record of the shard;
    /// otherwise returns the job's completion future.
    pub async fn recover_shard(&self, shard_id: ShardId) -> Result<JobFuture> {
        let context = self.context.as_ref().context(BackupUnavailableSnafu)?;
        let metadata = context
            .catalog
            .shard(shard_id)
            .await?
            .context(ShardUnknownSnafu { shard_id })?;
        context.stats.increment_active_shard_recovery();
        Ok(context
            .queue
            .submit(MissingShard::from_metadata(metadata, true))
            .await)
    }

    /// Recovery keys currently in flight.
    pub fn inflight_recoveries(&self) -> usize {
        self.context
            .as_ref()
            .map(|context| context.queue.inflight_len())
            .unwrap_or(0)
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> ShardRecoveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Forcibly stop the discovery loop and the worker pool. In-flight
    /// restores may leave staging files behind; the next start's discovery
    /// cycles reconverge.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.discovery_task.lock().take() {
            task.abort();
        }
        if let Some(context) = &self.context {
            context.queue.shutdown();
        }
        info!("shard recovery manager shut down");
    }
}

impl Drop for ShardRecoveryManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct RecoveryContext {
    node_id: String,
    catalog: Arc<dyn ShardCatalog>,
    layout: StorageLayout,
    queue: MissingShardQueue,
    stats: Arc<ShardRecoveryStats>,
}

impl RecoveryContext {
    /// One discovery pass: enqueue a background recovery for every assigned
    /// shard whose local file is absent or has the wrong length. Checksums
    /// are deliberately not consulted here; length mismatch is the cheap
    /// indicator, and the worker re-verifies with checksums anyway.
    async fn enqueue_missing_shards(&self) -> Result<()> {
        let shards = self.catalog.node_shards(&self.node_id).await?;
        let mut enqueued = 0usize;
        for shard in shards {
            if !self.needs_recovery(&shard).await {
                continue;
            }
            self.stats.increment_background_shard_recovery();
            let future = self
                .queue
                .submit(MissingShard::from_metadata(shard, false))
                .await;
            let shard_id = shard.shard_id;
            tokio::spawn(async move {
                if let Err(error) = future.await {
                    warn!(shard = %shard_id, error = %error, "error recovering shard");
                }
            });
            enqueued += 1;
        }
        if enqueued > 0 {
            info!(enqueued, "enqueued missing shards for recovery");
        }
        Ok(())
    }

    async fn needs_recovery(&self, shard: &ShardMetadata) -> bool {
        match tokio::fs::metadata(self.layout.storage_file(shard.shard_id)).await {
            Ok(metadata) => metadata.len() != shard.byte_length,
            Err(_) => true,
        }
    }
}

async fn run_discovery_loop(
    context: Arc<RecoveryContext>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!("missing shard discovery loop started");
    loop {
        // Jitter each cycle to avoid synchronized catalog load across nodes.
        if !sleep_unless_cancelled(discovery_jitter(interval), &cancel).await {
            break;
        }
        if let Err(error) = context.enqueue_missing_shards().await {
            warn!(error = %error, "missing shard discovery failed");
        }
        if !sleep_unless_cancelled(interval, &cancel).await {
            break;
        }
    }
    info!("missing shard discovery loop stopped");
}

/// Uniformly random sleep in `[1, interval_secs)`; zero when the interval
/// leaves no room for jitter.
fn discovery_jitter(interval: Duration) -> Duration {
    let cap = interval.as_secs();
    if cap <= 1 {
        return Duration::ZERO;
    }
    Duration::from_secs(rand::thread_rng().gen_range(1..cap))
}

/// Sleep that is interrupted by cancellation; returns whether to continue.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_below_the_interval() {
        for _ in 0..100 {
            let jitter = discovery_jitter(Duration::from_secs(10));
            assert!(jitter >= Duration::from_secs(1));
            assert!(jitter < Duration::from_secs(10));
        }
        assert_eq!(discovery_jitter(Duration::from_secs(1)), Duration::ZERO);
        assert_eq!(discovery_jitter(Duration::ZERO), Duration::ZERO);
    }
}

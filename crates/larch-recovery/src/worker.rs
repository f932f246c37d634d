//! The recovery worker: restores one shard from backup with atomic
//! publication and quarantine of corrupt files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use snafu::ResultExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backup::BackupStore;
use crate::constants::QUARANTINE_SUFFIX;
use crate::error::{
    BackupCorruptionSnafu, BackupNotFoundSnafu, RecoveryFailedSnafu, RecoveryIoSnafu, Result,
};
use crate::integrity::is_file_corrupt;
use crate::layout::StorageLayout;
use crate::queue::RecoverShard;
use crate::shard::{MissingShard, ShardId};
use crate::stats::{ShardRecoveryStats, data_rate};

/// Restores missing shards from the backup store.
///
/// Restore sequence for one shard: fetch into a uniquely-suffixed staging
/// file, verify, publish with an atomic rename, verify again. Files that
/// fail verification are renamed into quarantine with a `.corrupt` suffix,
/// never silently deleted.
pub struct ShardRecoveryWorker {
    layout: StorageLayout,
    backup: Arc<dyn BackupStore>,
    stats: Arc<ShardRecoveryStats>,
}

impl ShardRecoveryWorker {
    /// Worker over the given layout and backup store.
    pub fn new(
        layout: StorageLayout,
        backup: Arc<dyn BackupStore>,
        stats: Arc<ShardRecoveryStats>,
    ) -> Self {
        Self {
            layout,
            backup,
            stats,
        }
    }

    /// Restore one shard from backup.
    ///
    /// A valid local file is a no-op success. A local file with bad length
    /// or checksum is quarantined first. No staging file remains after this
    /// returns, success or failure.
    pub async fn restore_from_backup(&self, shard: &MissingShard) -> Result<()> {
        let shard_id = shard.shard_id;
        let storage_file = self.layout.storage_file(shard_id);

        if !self.backup.shard_exists(shard_id).await? {
            self.stats.increment_shard_recovery_backup_not_found();
            return BackupNotFoundSnafu { shard_id }.fail();
        }

        if file_exists(&storage_file).await {
            let corrupt = is_file_corrupt(&storage_file, shard.byte_length, shard.xxhash64)
                .await
                .context(RecoveryIoSnafu {
                    shard_id,
                    message: "failed to verify local shard file".to_string(),
                })?;
            if !corrupt {
                return Ok(());
            }
            self.stats.increment_corrupt_local_file();
            self.quarantine(shard_id, &storage_file, "local file is corrupt")
                .await;
        }

        let staging_file = temporary_suffix(self.layout.staging_file(shard_id));
        self.layout
            .create_parents(&staging_file)
            .await
            .context(RecoveryIoSnafu {
                shard_id,
                message: "failed to create staging directories".to_string(),
            })?;

        info!(shard = %shard_id, "copying shard from backup");
        let start = Instant::now();
        if let Err(error) = self.backup.restore_shard(shard_id, &staging_file).await {
            self.stats.increment_shard_recovery_failure();
            let _ = tokio::fs::remove_file(&staging_file).await;
            return Err(error);
        }
        let elapsed = start.elapsed();

        let restored_bytes = tokio::fs::metadata(&staging_file)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        self.stats.record_data_rate(restored_bytes, elapsed);
        info!(
            shard = %shard_id,
            bytes = restored_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            bytes_per_second = data_rate(restored_bytes, elapsed) as u64,
            "copied shard from backup"
        );

        self.layout
            .create_parents(&storage_file)
            .await
            .context(RecoveryIoSnafu {
                shard_id,
                message: "failed to create storage directories".to_string(),
            })?;

        // Atomic publication. A rename that finds the destination already
        // present replaces it with identical content, so a concurrent
        // recovery winning the race is indistinguishable from success.
        let renamed = tokio::fs::rename(&staging_file, &storage_file).await;
        let _ = tokio::fs::remove_file(&staging_file).await;
        if let Err(error) = renamed {
            self.stats.increment_shard_recovery_failure();
            return Err(error).context(RecoveryIoSnafu {
                shard_id,
                message: "failed to move shard into place".to_string(),
            });
        }

        if !file_exists(&storage_file).await {
            self.stats.increment_shard_recovery_failure();
            return RecoveryFailedSnafu {
                shard_id,
                message: "file does not exist after recovery".to_string(),
            }
            .fail();
        }

        let corrupt = is_file_corrupt(&storage_file, shard.byte_length, shard.xxhash64)
            .await
            .context(RecoveryIoSnafu {
                shard_id,
                message: "failed to verify recovered shard file".to_string(),
            })?;
        if corrupt {
            self.stats.increment_shard_recovery_failure();
            self.stats.increment_corrupt_recovered_file();
            self.quarantine(shard_id, &storage_file, "file is corrupt after recovery")
                .await;
            return BackupCorruptionSnafu { shard_id }.fail();
        }

        self.stats.increment_shard_recovery_success();
        Ok(())
    }

    /// Move a corrupt file into quarantine, preserving it for inspection.
    /// If a quarantine copy already exists the corrupt file is left in
    /// place; if the rename fails the file is deleted instead.
    async fn quarantine(&self, shard_id: ShardId, file: &Path, reason: &str) {
        let quarantine = quarantine_suffix(self.layout.quarantine_file(shard_id));
        if file_exists(&quarantine).await {
            warn!(
                shard = %shard_id,
                quarantine = %quarantine.display(),
                reason,
                "quarantine already exists; leaving corrupt file in place"
            );
            return;
        }

        error!(
            shard = %shard_id,
            quarantine = %quarantine.display(),
            reason,
            "quarantining corrupt shard file"
        );
        if let Err(parent_error) = self.layout.create_parents(&quarantine).await {
            warn!(shard = %shard_id, error = %parent_error, "failed to create quarantine directories");
        }
        if let Err(rename_error) = tokio::fs::rename(file, &quarantine).await {
            warn!(
                shard = %shard_id,
                error = %rename_error,
                "quarantine of corrupt file failed; deleting it"
            );
            let _ = tokio::fs::remove_file(file).await;
        }
    }
}

#[async_trait]
impl RecoverShard for ShardRecoveryWorker {
    async fn recover(&self, shard: &MissingShard) -> Result<()> {
        self.restore_from_backup(shard).await
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Unique staging path: distinct even when duplicate keys race.
fn temporary_suffix(path: PathBuf) -> PathBuf {
    let mut name = path.into_os_string();
    name.push(format!(".tmp-{}", Uuid::new_v4()));
    PathBuf::from(name)
}

fn quarantine_suffix(path: PathBuf) -> PathBuf {
    let mut name = path.into_os_string();
    name.push(QUARANTINE_SUFFIX);
    PathBuf::from(name)
}

//! The backup store collaborator and its filesystem reference backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::ResultExt;

use crate::error::{RecoveryIoSnafu, Result};
use crate::shard::ShardId;

/// Durable copy of every shard, external to the storage node.
///
/// The physical medium (object store, remote filesystem, tape robot) is out
/// of scope here; implementations own their retries and timeouts.
#[async_trait]
pub trait BackupStore: Send + Sync + 'static {
    /// Whether the backup holds a copy of the shard.
    async fn shard_exists(&self, shard_id: ShardId) -> Result<bool>;

    /// Copy the shard's bytes into `destination`.
    async fn restore_shard(&self, shard_id: ShardId, destination: &Path) -> Result<()>;
}

/// Directory-backed backup store with the same fan-out as the storage
/// layout. The reference backend for tests and single-rack deployments.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    base: PathBuf,
}

impl FileBackupStore {
    /// Store rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Path of one shard's backup copy.
    pub fn backup_file(&self, shard_id: ShardId) -> PathBuf {
        let name = shard_id.to_string();
        self.base.join(&name[0..2]).join(&name[2..4]).join(name)
    }

    /// Copy a local shard file into the backup.
    pub async fn backup_shard(&self, shard_id: ShardId, source: &Path) -> Result<()> {
        let backup_file = self.backup_file(shard_id);
        if let Some(parent) = backup_file.parent() {
            tokio::fs::create_dir_all(parent).await.context(RecoveryIoSnafu {
                shard_id,
                message: "failed to create backup directories".to_string(),
            })?;
        }
        tokio::fs::copy(source, &backup_file)
            .await
            .context(RecoveryIoSnafu {
                shard_id,
                message: "failed to copy shard into backup".to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn shard_exists(&self, shard_id: ShardId) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.backup_file(shard_id))
            .await
            .unwrap_or(false))
    }

    async fn restore_shard(&self, shard_id: ShardId, destination: &Path) -> Result<()> {
        tokio::fs::copy(self.backup_file(shard_id), destination)
            .await
            .context(RecoveryIoSnafu {
                shard_id,
                message: "failed to copy shard from backup".to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_shard_through_backup() {
        let backup_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::new(backup_dir.path());
        let shard_id = ShardId::random();

        let source = work_dir.path().join("original");
        tokio::fs::write(&source, b"shard contents").await.unwrap();

        assert!(!store.shard_exists(shard_id).await.unwrap());
        store.backup_shard(shard_id, &source).await.unwrap();
        assert!(store.shard_exists(shard_id).await.unwrap());

        let restored = work_dir.path().join("restored");
        store.restore_shard(shard_id, &restored).await.unwrap();
        assert_eq!(
            tokio::fs::read(&restored).await.unwrap(),
            b"shard contents"
        );
    }
}

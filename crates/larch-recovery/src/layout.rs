//! On-disk layout of shard files on a storage node.
//!
//! Final shard files fan out under `storage/aa/bb/<uuid>` (first four hex
//! digits of the shard id) to keep directory sizes bounded. Staging and
//! quarantine are flat: staging files are transient, and quarantine is
//! expected to stay near-empty.

use std::io;
use std::path::{Path, PathBuf};

use crate::shard::ShardId;

/// Resolves the storage, staging, and quarantine paths for shards.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Root directory of the layout.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Final path of a shard file.
    pub fn storage_file(&self, shard_id: ShardId) -> PathBuf {
        let name = shard_id.to_string();
        self.base
            .join("storage")
            .join(&name[0..2])
            .join(&name[2..4])
            .join(name)
    }

    /// Staging path used as the rename source for atomic publication.
    /// Callers append a random suffix for uniqueness.
    pub fn staging_file(&self, shard_id: ShardId) -> PathBuf {
        self.base.join("staging").join(shard_id.to_string())
    }

    /// Quarantine path for a shard that failed integrity verification.
    pub fn quarantine_file(&self, shard_id: ShardId) -> PathBuf {
        self.base.join("quarantine").join(shard_id.to_string())
    }

    /// Create the top-level layout directories.
    pub async fn ensure_directories(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(self.base.join("storage")).await?;
        tokio::fs::create_dir_all(self.base.join("staging")).await?;
        tokio::fs::create_dir_all(self.base.join("quarantine")).await?;
        Ok(())
    }

    /// Create the parent directories of `path`.
    pub async fn create_parents(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => tokio::fs::create_dir_all(parent).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_files_fan_out_by_id_prefix() {
        let layout = StorageLayout::new("/data/larch");
        let shard_id = ShardId::random();
        let name = shard_id.to_string();

        let path = layout.storage_file(shard_id);
        let expected: PathBuf = [
            "/data/larch",
            "storage",
            &name[0..2],
            &name[2..4],
            &name,
        ]
        .iter()
        .collect();
        assert_eq!(path, expected);
    }

    #[test]
    fn staging_and_quarantine_are_flat() {
        let layout = StorageLayout::new("/data/larch");
        let shard_id = ShardId::random();
        assert_eq!(
            layout.staging_file(shard_id),
            PathBuf::from("/data/larch/staging").join(shard_id.to_string())
        );
        assert_eq!(
            layout.quarantine_file(shard_id),
            PathBuf::from("/data/larch/quarantine").join(shard_id.to_string())
        );
    }

    #[tokio::test]
    async fn ensure_directories_creates_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.ensure_directories().await.unwrap();
        assert!(dir.path().join("storage").is_dir());
        assert!(dir.path().join("staging").is_dir());
        assert!(dir.path().join("quarantine").is_dir());
    }
}

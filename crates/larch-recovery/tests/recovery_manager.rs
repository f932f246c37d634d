//! End-to-end tests for the shard recovery manager.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use larch_recovery::{
    BackupStore, FileBackupStore, RecoveryConfig, Result, ShardCatalog, ShardId, ShardMetadata,
    ShardRecoveryError, ShardRecoveryManager, StorageLayout,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use xxhash_rust::xxh64::xxh64;

const NODE: &str = "storage-node-1";

#[derive(Default)]
struct TestingCatalog {
    shards: Mutex<HashMap<ShardId, ShardMetadata>>,
    shard_lookups: AtomicUsize,
}

impl TestingCatalog {
    fn assign(&self, metadata: ShardMetadata) {
        self.shards.lock().insert(metadata.shard_id, metadata);
    }

    fn lookups(&self) -> usize {
        self.shard_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShardCatalog for TestingCatalog {
    async fn node_shards(&self, _node_id: &str) -> Result<Vec<ShardMetadata>> {
        Ok(self.shards.lock().values().copied().collect())
    }

    async fn shard(&self, shard_id: ShardId) -> Result<Option<ShardMetadata>> {
        self.shard_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.shards.lock().get(&shard_id).copied())
    }
}

/// Delegates to a file backup but stretches every copy, so tests can observe
/// concurrent jobs in flight.
struct SlowBackup {
    inner: FileBackupStore,
    delay: Duration,
}

#[async_trait]
impl BackupStore for SlowBackup {
    async fn shard_exists(&self, shard_id: ShardId) -> Result<bool> {
        self.inner.shard_exists(shard_id).await
    }

    async fn restore_shard(&self, shard_id: ShardId, destination: &Path) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.restore_shard(shard_id, destination).await
    }
}

struct Fixture {
    _storage_dir: TempDir,
    _backup_dir: TempDir,
    layout: StorageLayout,
    backup: FileBackupStore,
    catalog: Arc<TestingCatalog>,
}

impl Fixture {
    fn new() -> Self {
        let storage_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        Self {
            layout: StorageLayout::new(storage_dir.path()),
            backup: FileBackupStore::new(backup_dir.path()),
            catalog: Arc::new(TestingCatalog::default()),
            _storage_dir: storage_dir,
            _backup_dir: backup_dir,
        }
    }

    fn manager(&self, backup: Option<Arc<dyn BackupStore>>, interval_secs: u64) -> ShardRecoveryManager {
        ShardRecoveryManager::new(
            self.layout.clone(),
            backup,
            NODE,
            Arc::clone(&self.catalog) as Arc<dyn ShardCatalog>,
            RecoveryConfig {
                missing_shard_discovery_interval_secs: interval_secs,
                recovery_threads: 4,
            },
        )
    }

    async fn seed_shard(&self, contents: &[u8]) -> ShardMetadata {
        let metadata = ShardMetadata::new(
            ShardId::random(),
            contents.len() as u64,
            Some(xxh64(contents, 0)),
        );
        let scratch = self.layout.base().join("seed");
        tokio::fs::write(&scratch, contents).await.unwrap();
        self.backup
            .backup_shard(metadata.shard_id, &scratch)
            .await
            .unwrap();
        tokio::fs::remove_file(&scratch).await.unwrap();
        self.catalog.assign(metadata);
        metadata
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn discovery_restores_a_missing_shard() {
    let fixture = Fixture::new();
    let contents = b"discovered and restored";
    let metadata = fixture.seed_shard(contents).await;

    // One-second interval leaves no room for jitter, so the first cycle
    // runs immediately.
    let manager = fixture.manager(Some(Arc::new(fixture.backup.clone())), 1);
    manager.start().await.unwrap();

    let storage_file = fixture.layout.storage_file(metadata.shard_id);
    wait_until("shard to be restored", || storage_file.exists()).await;
    wait_until("recovery job to finish", || {
        manager.stats().shard_recovery_success >= 1
    })
    .await;

    assert_eq!(tokio::fs::read(&storage_file).await.unwrap(), contents);
    let stats = manager.stats();
    assert!(stats.background_shard_recovery >= 1);
    assert_eq!(stats.active_shard_recovery, 0);
    manager.shutdown();
}

#[tokio::test]
async fn discovery_quarantines_and_replaces_wrong_length_files() {
    let fixture = Fixture::new();
    let contents = b"correct contents";
    let metadata = fixture.seed_shard(contents).await;

    // Pre-place a local file with the wrong length.
    let storage_file = fixture.layout.storage_file(metadata.shard_id);
    fixture.layout.create_parents(&storage_file).await.unwrap();
    tokio::fs::write(&storage_file, b"short").await.unwrap();

    // A long interval keeps the scheduled loop out of the way; drive one
    // pass by hand.
    let manager = fixture.manager(Some(Arc::new(fixture.backup.clone())), 3600);
    manager.start().await.unwrap();
    manager.trigger_discovery();

    wait_until("corrupt file to be replaced", || {
        manager.stats().shard_recovery_success >= 1
    })
    .await;

    let mut quarantine = fixture
        .layout
        .quarantine_file(metadata.shard_id)
        .into_os_string();
    quarantine.push(".corrupt");
    assert_eq!(
        tokio::fs::read(std::path::PathBuf::from(quarantine))
            .await
            .unwrap(),
        b"short"
    );
    assert_eq!(tokio::fs::read(&storage_file).await.unwrap(), contents);
    assert_eq!(manager.stats().corrupt_local_file, 1);
    manager.shutdown();
}

#[tokio::test]
async fn discovery_skips_files_with_the_correct_length() {
    let fixture = Fixture::new();
    let contents = b"intact";
    let metadata = fixture.seed_shard(contents).await;

    let storage_file = fixture.layout.storage_file(metadata.shard_id);
    fixture.layout.create_parents(&storage_file).await.unwrap();
    tokio::fs::write(&storage_file, contents).await.unwrap();

    let manager = fixture.manager(Some(Arc::new(fixture.backup.clone())), 3600);
    manager.start().await.unwrap();
    manager.trigger_discovery();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(manager.stats().background_shard_recovery, 0);
    assert_eq!(manager.inflight_recoveries(), 0);
    manager.shutdown();
}

#[tokio::test]
async fn on_demand_recovery_waits_for_the_restore() {
    let fixture = Fixture::new();
    let contents = b"fetched for a reader";
    let metadata = fixture.seed_shard(contents).await;

    let manager = fixture.manager(Some(Arc::new(fixture.backup.clone())), 3600);
    manager.start().await.unwrap();

    let job = manager.recover_shard(metadata.shard_id).await.unwrap();
    job.await.unwrap();

    assert_eq!(
        tokio::fs::read(fixture.layout.storage_file(metadata.shard_id))
            .await
            .unwrap(),
        contents
    );
    let stats = manager.stats();
    assert_eq!(stats.active_shard_recovery, 1);
    assert_eq!(stats.shard_recovery_success, 1);
    assert_eq!(fixture.catalog.lookups(), 1);
    manager.shutdown();
}

#[tokio::test]
async fn unknown_shards_fail_fast() {
    let fixture = Fixture::new();
    let manager = fixture.manager(Some(Arc::new(fixture.backup.clone())), 3600);

    let error = manager.recover_shard(ShardId::random()).await.unwrap_err();
    assert!(matches!(error, ShardRecoveryError::ShardUnknown { .. }));
    assert_eq!(fixture.catalog.lookups(), 1);
}

#[tokio::test]
async fn missing_backup_store_disables_recovery() {
    let fixture = Fixture::new();
    let manager = fixture.manager(None, 1);

    manager.start().await.unwrap();
    let error = manager.recover_shard(ShardId::random()).await.unwrap_err();
    assert!(matches!(error, ShardRecoveryError::BackupUnavailable));
    manager.shutdown();
}

#[tokio::test]
async fn concurrent_active_and_background_recoveries_are_distinct_jobs() {
    let fixture = Fixture::new();
    let contents = b"requested twice at once";
    let metadata = fixture.seed_shard(contents).await;

    let slow_backup = Arc::new(SlowBackup {
        inner: fixture.backup.clone(),
        delay: Duration::from_millis(300),
    });
    let manager = fixture.manager(Some(slow_backup), 3600);
    manager.start().await.unwrap();

    manager.trigger_discovery();
    let job = manager.recover_shard(metadata.shard_id).await.unwrap();

    // Background and active entries are distinct keys, so both are in
    // flight at once while the slow copies run.
    wait_until("both priorities to be in flight", || {
        manager.inflight_recoveries() == 2
    })
    .await;

    job.await.unwrap();
    wait_until("background job to drain", || {
        manager.inflight_recoveries() == 0
    })
    .await;

    assert_eq!(
        tokio::fs::read(fixture.layout.storage_file(metadata.shard_id))
            .await
            .unwrap(),
        contents
    );
    let stats = manager.stats();
    assert_eq!(stats.active_shard_recovery, 1);
    assert_eq!(stats.background_shard_recovery, 1);
    assert_eq!(fixture.catalog.lookups(), 1);
    assert_eq!(stats.shard_recovery_failure, 0);
    manager.shutdown();
}

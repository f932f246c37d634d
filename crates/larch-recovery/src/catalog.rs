//! The shard catalog collaborator.

use async_trait::async_trait;

use crate::error::Result;
use crate::shard::{ShardId, ShardMetadata};

/// Read-only view of the cluster's authoritative shard catalog.
///
/// The catalog is consulted, never maintained, by the recovery manager.
/// Implementations are expected to surface read failures as
/// [`crate::ShardRecoveryError::Catalog`]; the discovery loop logs them and
/// keeps running.
#[async_trait]
pub trait ShardCatalog: Send + Sync + 'static {
    /// All shards currently assigned to the given node.
    async fn node_shards(&self, node_id: &str) -> Result<Vec<ShardMetadata>>;

    /// Metadata for one shard; `None` when the catalog has no record.
    async fn shard(&self, shard_id: ShardId) -> Result<Option<ShardMetadata>>;
}

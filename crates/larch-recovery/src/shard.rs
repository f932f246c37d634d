//! Shard identifiers, catalog metadata, and the recovery queue key.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit identifier of a catalog-tracked shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(Uuid);

impl ShardId {
    /// Wrap an existing UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Catalog record for one shard assigned to a node. The catalog is the
/// source of truth for expected length and checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    /// Shard identifier.
    pub shard_id: ShardId,
    /// Expected byte length of the shard file.
    pub byte_length: u64,
    /// Expected xxhash64 of the shard file, when the catalog has one.
    pub xxhash64: Option<u64>,
}

impl ShardMetadata {
    /// Convenience constructor.
    pub fn new(shard_id: ShardId, byte_length: u64, xxhash64: Option<u64>) -> Self {
        Self {
            shard_id,
            byte_length,
            xxhash64,
        }
    }
}

/// One recovery request: the dedup queue key.
///
/// Equality and hashing consider only `(shard_id, active)`: two requests for
/// the same shard at the same priority collapse to one job, while a
/// background request and an active request for the same shard are distinct
/// entries.
#[derive(Debug, Clone, Copy)]
pub struct MissingShard {
    /// Shard to recover.
    pub shard_id: ShardId,
    /// Expected byte length.
    pub byte_length: u64,
    /// Expected checksum, when known.
    pub xxhash64: Option<u64>,
    /// Active requests are serviced before background ones.
    pub active: bool,
}

impl MissingShard {
    /// Build a request from catalog metadata.
    pub fn from_metadata(metadata: ShardMetadata, active: bool) -> Self {
        Self {
            shard_id: metadata.shard_id,
            byte_length: metadata.byte_length,
            xxhash64: metadata.xxhash64,
            active,
        }
    }
}

impl PartialEq for MissingShard {
    fn eq(&self, other: &Self) -> bool {
        self.shard_id == other.shard_id && self.active == other.active
    }
}

impl Eq for MissingShard {}

impl Hash for MissingShard {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shard_id.hash(state);
        self.active.hash(state);
    }
}

impl fmt::Display for MissingShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.shard_id,
            if self.active { "active" } else { "background" }
        )
    }
}

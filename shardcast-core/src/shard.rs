//! Shard identifiers and key-to-shard mapping
//!
//! Shards are fixed partitions of the entity-id key space, identified by an
//! integer in `[1, number_of_shards]`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a shard. Valid ids live in `[1, number_of_shards]`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl ShardId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map an entity id to its owning shard using a stable 31-based string hash,
/// so every pod computes the same mapping without coordination.
pub fn shard_for_key(entity_id: &str, number_of_shards: u32) -> ShardId {
    let mut hash: i32 = 0;
    for byte in entity_id.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as i32);
    }
    ShardId(hash.unsigned_abs() % number_of_shards + 1)
}

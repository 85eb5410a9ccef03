//! Shardcast Core Library
//!
//! Core abstractions for the Shardcast cluster sharding coordinator.
//! This crate provides:
//! - Pod identity and dotted-version comparison
//! - Shard identifiers and the key-to-shard mapping
//! - Immutable cluster state snapshots with derived views
//! - Sharding events and common error handling

pub mod error;
pub mod event;
pub mod message;
pub mod pod;
pub mod shard;
pub mod state;

pub use error::{Result, ShardingError};
pub use event::ShardingEvent;
pub use message::{Envelope, ReplyId};
pub use pod::{compare_version, extract_version, Pod, PodAddress, PodWithMetadata};
pub use shard::{shard_for_key, ShardId};
pub use state::ClusterState;

/// Default size of the shard id space. The id space is fixed at cluster
/// configuration time and never grows or shrinks at runtime.
///
/// Override at runtime via the SHARDCAST_NUMBER_OF_SHARDS env var.
pub const DEFAULT_NUMBER_OF_SHARDS: u32 = 300;

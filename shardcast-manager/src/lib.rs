//! Shardcast Manager Library
//!
//! This crate provides the Shard Manager, the single authority for shard
//! placement in a Shardcast cluster.
//!
//! The manager tracks pod membership and performs:
//! - Shard assignment (place unassigned shards on live pods)
//! - Failover (release and reassign shards of failed pods)
//! - Load rebalancing (level shard counts across pods, rate limited)
//! - Rolling-upgrade awareness (stale pod versions never gain shards)

pub mod config;
pub mod manager;
pub mod pods;
pub mod rebalance;
pub mod storage;

// Re-export main types
pub use config::ManagerConfig;
pub use manager::ShardManager;
pub use pods::{LoopbackPods, PingPodsHealth, Pods, PodsHealth};
pub use rebalance::{
    decide_assignments_for_unassigned_shards, decide_assignments_for_unbalanced_shards,
    RebalanceDecision,
};
pub use storage::{MemoryStorage, Storage};

//! Sharding events
//!
//! Events emitted by the Shard Manager for external subscribers. They are
//! distributed over a non-blocking fan-out channel; publishing never waits
//! on slow subscribers.

use crate::pod::PodAddress;
use crate::shard::ShardId;
use std::collections::BTreeSet;
use std::fmt;

/// Cluster lifecycle events observable by any number of subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardingEvent {
    PodRegistered(PodAddress),
    PodUnregistered(PodAddress),
    PodHealthChecked(PodAddress),
    ShardsAssigned(PodAddress, BTreeSet<ShardId>),
    ShardsUnassigned(PodAddress, BTreeSet<ShardId>),
}

fn show_shards(shards: &BTreeSet<ShardId>) -> String {
    let ids: Vec<String> = shards.iter().map(|shard| shard.to_string()).collect();
    format!("[{}]", ids.join(", "))
}

impl fmt::Display for ShardingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PodRegistered(pod) => write!(f, "PodRegistered({pod})"),
            Self::PodUnregistered(pod) => write!(f, "PodUnregistered({pod})"),
            Self::PodHealthChecked(pod) => write!(f, "PodHealthChecked({pod})"),
            Self::ShardsAssigned(pod, shards) => {
                write!(f, "ShardsAssigned({pod}, {})", show_shards(shards))
            }
            Self::ShardsUnassigned(pod, shards) => {
                write!(f, "ShardsUnassigned({pod}, {})", show_shards(shards))
            }
        }
    }
}

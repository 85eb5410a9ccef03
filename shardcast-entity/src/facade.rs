//! Sharding runtime seam
//!
//! What the entity manager needs from the surrounding sharding runtime:
//! which shards live on this pod, whether the pod is draining, and a reply
//! registry that routes a response back to the asker by reply id. Kept as a
//! trait so tests and the demo can run without any networking.

use crate::message::ReplyChannel;
use crate::recipient::RecipientType;
use async_trait::async_trait;
use shardcast_core::{shard_for_key, ReplyId, ShardId, DEFAULT_NUMBER_OF_SHARDS};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

#[async_trait]
pub trait ShardingFacade<Res>: Send + Sync {
    /// Shard an entity id maps to. Pure; every pod computes the same value.
    fn get_shard_id(&self, recipient: &RecipientType, entity_id: &str) -> ShardId;

    /// Whether this pod currently owns the entity's shard.
    async fn is_entity_on_local_shards(&self, recipient: &RecipientType, entity_id: &str) -> bool;

    /// Whether this pod is shutting down. A draining pod refuses to start
    /// new entities.
    async fn is_shutting_down(&self) -> bool;

    /// Register the channel a later reply to `reply_id` should be routed to.
    async fn init_reply(&self, reply_id: ReplyId, channel: ReplyChannel<Res>);

    /// Close a registered reply without answering it; the asker resolves
    /// to no value.
    async fn end_reply(&self, reply_id: &ReplyId);
}

/// Facade backed by a local shard set, updated by assign/unassign calls,
/// with an in-process reply registry.
pub struct LocalSharding<Res> {
    number_of_shards: u32,
    assigned: RwLock<BTreeSet<ShardId>>,
    shutting_down: AtomicBool,
    replies: Mutex<HashMap<ReplyId, ReplyChannel<Res>>>,
}

impl<Res> LocalSharding<Res> {
    pub fn new(number_of_shards: u32) -> Self {
        Self {
            number_of_shards,
            assigned: RwLock::new(BTreeSet::new()),
            shutting_down: AtomicBool::new(false),
            replies: Mutex::new(HashMap::new()),
        }
    }

    /// Facade owning every shard, for single-pod setups and tests.
    pub async fn with_all_shards(number_of_shards: u32) -> Self {
        let sharding = Self::new(number_of_shards);
        sharding
            .assign((1..=number_of_shards).map(ShardId).collect())
            .await;
        sharding
    }

    pub async fn assign(&self, shards: BTreeSet<ShardId>) {
        self.assigned.write().await.extend(shards);
    }

    pub async fn unassign(&self, shards: &BTreeSet<ShardId>) {
        let mut assigned = self.assigned.write().await;
        for shard in shards {
            assigned.remove(shard);
        }
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Route a response to whoever registered `reply_id`. Each id can be
    /// answered once; late or unknown ids are logged and dropped.
    pub async fn reply(&self, reply_id: &ReplyId, value: Res) {
        match self.replies.lock().await.remove(reply_id) {
            Some(channel) => channel.reply(value),
            None => warn!(reply_id = %reply_id, "Reply for unknown or already answered id"),
        }
    }

    /// Reply channels currently waiting for an answer.
    pub async fn pending_replies(&self) -> usize {
        self.replies.lock().await.len()
    }
}

impl<Res> Default for LocalSharding<Res> {
    fn default() -> Self {
        Self::new(DEFAULT_NUMBER_OF_SHARDS)
    }
}

#[async_trait]
impl<Res: Send + 'static> ShardingFacade<Res> for LocalSharding<Res> {
    fn get_shard_id(&self, _recipient: &RecipientType, entity_id: &str) -> ShardId {
        shard_for_key(entity_id, self.number_of_shards)
    }

    async fn is_entity_on_local_shards(&self, recipient: &RecipientType, entity_id: &str) -> bool {
        let shard = self.get_shard_id(recipient, entity_id);
        self.assigned.read().await.contains(&shard)
    }

    async fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn init_reply(&self, reply_id: ReplyId, channel: ReplyChannel<Res>) {
        self.replies.lock().await.insert(reply_id, channel);
    }

    async fn end_reply(&self, reply_id: &ReplyId) {
        if let Some(channel) = self.replies.lock().await.remove(reply_id) {
            channel.end();
        }
    }
}

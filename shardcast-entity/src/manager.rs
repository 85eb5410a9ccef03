//! Entity Manager
//!
//! Owns every live entity of one recipient type on one pod. An entity is in
//! one of three states: absent, active (mailbox open, behavior running) or
//! terminating (mailbox closed, behavior draining). All transitions happen
//! under the directory lock, so a send can never race a half-built entity.
//!
//! Senders that hit a terminating entity back off and retry; once the old
//! incarnation is gone a fresh one is started, which gives the cluster-wide
//! single-incarnation guarantee without blocking the caller on teardown.

use crate::config::EntityConfig;
use crate::facade::ShardingFacade;
use crate::mailbox::{mailbox, EntityMessage, MailboxReceiver, MailboxSender};
use crate::message::{reply_channel, ReplyChannel};
use crate::recipient::RecipientType;
use async_trait::async_trait;
use futures::FutureExt;
use shardcast_core::{ReplyId, Result, ShardId, ShardingError};
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// User-supplied entity logic. One invocation per incarnation; it should
/// drain its mailbox until `PoisonPill` (or `None`) and then return.
/// Responses to requests carrying a reply id go through the sharding
/// facade's reply registry.
#[async_trait]
pub trait EntityBehavior<Req>: Send + Sync {
    async fn run(&self, entity_id: String, mailbox: MailboxReceiver<Req>);
}

enum EntityState<Req> {
    Active {
        mailbox: MailboxSender<Req>,
        last_activity: Arc<AtomicU64>,
        done: watch::Receiver<bool>,
    },
    Terminating {
        done: watch::Receiver<bool>,
    },
}

pub struct EntityManager<Req, Res> {
    recipient: RecipientType,
    behavior: Arc<dyn EntityBehavior<Req>>,
    sharding: Arc<dyn ShardingFacade<Res>>,
    config: EntityConfig,
    entities: Mutex<HashMap<String, EntityState<Req>>>,
    reply_seq: AtomicU64,
}

impl<Req, Res> EntityManager<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new(
        recipient: RecipientType,
        behavior: Arc<dyn EntityBehavior<Req>>,
        sharding: Arc<dyn ShardingFacade<Res>>,
        config: EntityConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            recipient,
            behavior,
            sharding,
            config,
            entities: Mutex::new(HashMap::new()),
            reply_seq: AtomicU64::new(0),
        })
    }

    /// Fire-and-forget delivery.
    pub async fn tell(self: &Arc<Self>, entity_id: &str, request: Req) -> Result<()> {
        let (channel, _) = reply_channel();
        self.send(entity_id, request, None, channel).await
    }

    /// Request-response delivery. Resolves `None` when the entity finished
    /// (or chose to end the reply) without answering.
    pub async fn ask(self: &Arc<Self>, entity_id: &str, request: Req) -> Result<Option<Res>> {
        let reply_id = ReplyId::new(format!(
            "{}-{}",
            entity_id,
            self.reply_seq.fetch_add(1, Ordering::Relaxed)
        ));
        let (channel, receiver) = reply_channel();
        self.send(entity_id, request, Some(reply_id), channel)
            .await?;
        Ok(receiver.recv().await)
    }

    /// Deliver one request to an entity, starting it if needed.
    ///
    /// Without a reply id the request is fire-and-forget: it is enqueued and
    /// the channel closed right away. With a reply id the channel is
    /// registered with the facade once a mailbox is obtained, so the
    /// entity's eventual answer finds it and a rejected send leaves nothing
    /// behind in the registry.
    pub async fn send(
        self: &Arc<Self>,
        entity_id: &str,
        request: Req,
        reply_id: Option<ReplyId>,
        reply_channel: ReplyChannel<Res>,
    ) -> Result<()> {
        let mut channel = Some(reply_channel);
        let registered = reply_id.clone();
        let message = EntityMessage::Request { request, reply_id };
        loop {
            // Ownership can move between retries, so re-check each round.
            // Topics have a subscriber on every pod; only entity ids are
            // pinned to a shard.
            if matches!(self.recipient, RecipientType::Entity { .. })
                && !self
                    .sharding
                    .is_entity_on_local_shards(&self.recipient, entity_id)
                    .await
            {
                return Err(ShardingError::EntityNotManagedByThisPod(
                    entity_id.to_string(),
                ));
            }

            let target = {
                let mut entities = self.entities.lock().await;
                match entities.get(entity_id) {
                    Some(EntityState::Active {
                        mailbox,
                        last_activity,
                        ..
                    }) => {
                        last_activity.store(now_millis(), Ordering::SeqCst);
                        Some(mailbox.clone())
                    }
                    Some(EntityState::Terminating { .. }) => None,
                    None => {
                        if self.sharding.is_shutting_down().await {
                            return Err(ShardingError::EntityNotManagedByThisPod(
                                entity_id.to_string(),
                            ));
                        }
                        Some(self.spawn_entity(&mut entities, entity_id))
                    }
                }
            };

            if let Some(mailbox) = target {
                // Register just ahead of the enqueue so an instant answer
                // cannot miss its channel
                if let Some(id) = &registered {
                    if let Some(pending) = channel.take() {
                        self.sharding.init_reply(id.clone(), pending).await;
                    }
                }
                return match mailbox.enqueue(message) {
                    Ok(()) => {
                        if let Some(pending) = channel.take() {
                            pending.end();
                        }
                        Ok(())
                    }
                    Err(error) => {
                        // The behavior exited ahead of the directory
                        // protocol. Release the registered channel so the
                        // asker is not left waiting
                        if let Some(id) = &registered {
                            self.sharding.end_reply(id).await;
                        }
                        warn!(entity = entity_id, "Mailbox closed under an active entry");
                        Err(error)
                    }
                };
            }
            tokio::time::sleep(self.config.send_retry_interval()).await;
        }
    }

    /// Start a fresh incarnation: behavior task plus idle watchdog. Caller
    /// holds the directory lock.
    fn spawn_entity(
        self: &Arc<Self>,
        entities: &mut HashMap<String, EntityState<Req>>,
        entity_id: &str,
    ) -> MailboxSender<Req> {
        debug!(recipient = %self.recipient, entity = entity_id, "Starting entity");
        let (sender, receiver) = mailbox();
        let (done_tx, done_rx) = watch::channel(false);
        let last_activity = Arc::new(AtomicU64::new(now_millis()));

        let id = entity_id.to_string();
        let behavior = Arc::clone(&self.behavior);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let run = AssertUnwindSafe(behavior.run(id.clone(), receiver)).catch_unwind();
            if run.await.is_err() {
                error!(entity = %id, "Entity behavior panicked");
            }
            // Signal before removing: terminators wait on the signal, new
            // incarnations wait on the removal
            let _ = done_tx.send(true);
            manager.entities.lock().await.remove(&id);
        });

        let id = entity_id.to_string();
        let manager = Arc::clone(self);
        let activity = Arc::clone(&last_activity);
        let mut done = done_rx.clone();
        tokio::spawn(async move {
            loop {
                let idle_for = now_millis().saturating_sub(activity.load(Ordering::SeqCst));
                if idle_for >= manager.config.max_idle_time_millis {
                    debug!(entity = %id, "Entity idle, stopping");
                    manager.fork_entity_termination(&id).await;
                    return;
                }
                let remaining =
                    Duration::from_millis(manager.config.max_idle_time_millis - idle_for);
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = done.changed() => return,
                }
            }
        });

        entities.insert(
            entity_id.to_string(),
            EntityState::Active {
                mailbox: sender.clone(),
                last_activity,
                done: done_rx,
            },
        );
        sender
    }

    /// Begin a graceful stop: enqueue the pill, close the mailbox and mark
    /// the entity terminating. Returns a signal that resolves when the
    /// behavior has finished, or `None` for an absent entity.
    pub async fn fork_entity_termination(&self, entity_id: &str) -> Option<watch::Receiver<bool>> {
        let mut entities = self.entities.lock().await;
        match entities.remove(entity_id) {
            None => None,
            Some(EntityState::Terminating { done }) => {
                let signal = done.clone();
                entities.insert(entity_id.to_string(), EntityState::Terminating { done });
                Some(signal)
            }
            Some(EntityState::Active { mailbox, done, .. }) => {
                // The pill may miss a behavior that already exited; cleanup
                // handles that incarnation either way
                if let Err(error) = mailbox.enqueue(EntityMessage::PoisonPill) {
                    debug!(
                        entity = entity_id,
                        error = %error,
                        "Stop signal missed an already-exited entity"
                    );
                }
                let signal = done.clone();
                entities.insert(entity_id.to_string(), EntityState::Terminating { done });
                debug!(recipient = %self.recipient, entity = entity_id, "Terminating entity");
                Some(signal)
            }
        }
    }

    /// Gracefully stop every entity living on one of the given shards and
    /// wait for them, bounded by the termination timeout. Used when shards
    /// are handed over to another pod.
    pub async fn terminate_entities_on_shards(&self, shards: &BTreeSet<ShardId>) {
        let ids: Vec<String> = {
            let entities = self.entities.lock().await;
            entities
                .keys()
                .filter(|id| shards.contains(&self.sharding.get_shard_id(&self.recipient, id)))
                .cloned()
                .collect()
        };
        self.terminate_and_wait(ids).await;
    }

    /// Gracefully stop everything, for pod shutdown.
    pub async fn terminate_all_entities(&self) {
        let ids: Vec<String> = self.entities.lock().await.keys().cloned().collect();
        self.terminate_and_wait(ids).await;
    }

    async fn terminate_and_wait(&self, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        info!(recipient = %self.recipient, count = ids.len(), "Terminating entities");

        // One deadline per entity, awaited concurrently, so a stuck
        // behavior is named in the log and never holds up the others
        let deadline = self.config.termination_timeout();
        let waits = ids.into_iter().map(|id| async move {
            let Some(signal) = self.fork_entity_termination(&id).await else {
                return;
            };
            if tokio::time::timeout(deadline, wait_done(signal)).await.is_err() {
                error!(
                    recipient = %self.recipient,
                    entity = %id,
                    "Entity ignored its stop signal past the termination deadline"
                );
            } else {
                debug!(recipient = %self.recipient, entity = %id, "Entity terminated");
            }
        });
        futures::future::join_all(waits).await;
    }

    /// Number of entities currently active or terminating.
    pub async fn entity_count(&self) -> usize {
        self.entities.lock().await.len()
    }
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    while !*done.borrow() {
        if done.changed().await.is_err() {
            return;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

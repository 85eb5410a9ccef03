//! Shard Manager
//!
//! Single authority for pod membership and shard ownership. All state
//! transitions go through the snapshot in `self.state`; the rebalance gate
//! serializes rounds so concurrent triggers cannot interleave their RPCs.
//!
//! Persistence is write-behind: saves run detached with bounded retries and
//! a failed save is logged and dropped, never blocking the control plane.

use crate::config::ManagerConfig;
use crate::pods::{Pods, PodsHealth};
use crate::rebalance::{
    decide_assignments_for_unassigned_shards, decide_assignments_for_unbalanced_shards,
};
use crate::storage::Storage;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use shardcast_core::state::unassigned_table;
use shardcast_core::{
    ClusterState, Pod, PodAddress, PodWithMetadata, Result, ShardId, ShardingError, ShardingEvent,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Buffered events per subscriber; slow subscribers drop the oldest events
/// rather than backpressuring the manager.
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Shard Manager service.
///
/// Cheap to share: construct once, clone the `Arc`.
pub struct ShardManager {
    state: RwLock<ClusterState>,
    rebalance_gate: Mutex<()>,
    events: broadcast::Sender<ShardingEvent>,
    pods: Arc<dyn Pods>,
    health: Arc<dyn PodsHealth>,
    storage: Arc<dyn Storage>,
    config: ManagerConfig,
}

impl ShardManager {
    pub fn new(
        pods: Arc<dyn Pods>,
        health: Arc<dyn PodsHealth>,
        storage: Arc<dyn Storage>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(ClusterState::initial(config.number_of_shards)),
            rebalance_gate: Mutex::new(()),
            events,
            pods,
            health,
            storage,
            config,
        })
    }

    /// Recover persisted state, then spawn the background loops: an event
    /// logger and the periodic load rebalance.
    pub async fn start(self: &Arc<Self>) {
        self.recover().await;
        // Place whatever recovery left unassigned before the first interval;
        // an immediate round also arms the delayed retry if it fails
        let unassigned = !self.state.read().await.unassigned_shards.is_empty();
        self.rebalance(unassigned).await;

        let this = Arc::clone(self);
        tokio::spawn(async move { this.persist_pods().await });

        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => info!(event = %event, "Sharding event"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event log fell behind")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.config.rebalance_interval()).await;
                this.rebalance(false).await;
            }
        });
    }

    /// Rebuild state from storage. Read failures degrade to an empty table;
    /// pods that no longer answer their health probe are dropped along with
    /// their assignments, so their shards come back as unassigned.
    #[instrument(skip(self))]
    pub async fn recover(self: &Arc<Self>) {
        let persisted_pods = match self.storage.get_pods().await {
            Ok(pods) => pods,
            Err(error) => {
                warn!(error = %error, "Failed to load persisted pods, starting empty");
                BTreeMap::new()
            }
        };
        let persisted_assignments = match self.storage.get_assignments().await {
            Ok(assignments) => assignments,
            Err(error) => {
                warn!(error = %error, "Failed to load persisted assignments, starting empty");
                BTreeMap::new()
            }
        };

        let alive: BTreeSet<PodAddress> = stream::iter(persisted_pods.keys().cloned())
            .map(|address| {
                let health = Arc::clone(&self.health);
                async move {
                    let alive = health.is_alive(&address).await;
                    (address, alive)
                }
            })
            .buffer_unordered(self.config.rpc_concurrency)
            .filter_map(|(address, alive)| async move { alive.then_some(address) })
            .collect()
            .await;

        let registered = now_millis();
        let pods: BTreeMap<PodAddress, PodWithMetadata> = persisted_pods
            .into_iter()
            .filter(|(address, _)| alive.contains(address))
            .map(|(address, pod)| (address, PodWithMetadata::new(pod, registered)))
            .collect();

        // Union with the full table: shards missing from storage (or owned
        // by a dead pod) recover as unassigned.
        let mut shards = unassigned_table(self.config.number_of_shards);
        for (shard, owner) in persisted_assignments {
            if shards.contains_key(&shard) {
                shards.insert(shard, owner.filter(|address| alive.contains(address)));
            }
        }

        let state = ClusterState::new(pods, shards);
        info!(
            pods = state.pods.len(),
            unassigned = state.unassigned_shards.len(),
            "Recovered cluster state"
        );
        *self.state.write().await = state;
    }

    /// Register a pod (or refresh its version and registration time). New
    /// capacity triggers an immediate attempt to place unassigned shards.
    #[instrument(skip(self, pod), fields(pod = %pod.address, version = %pod.version))]
    pub async fn register(self: &Arc<Self>, pod: Pod) {
        info!("Registering pod");
        let address = pod.address.clone();
        let meta = PodWithMetadata::new(pod, now_millis());

        let has_unassigned = {
            let mut guard = self.state.write().await;
            let mut pods = guard.pods.clone();
            pods.insert(address.clone(), meta);
            *guard = ClusterState::new(pods, guard.shards.clone());
            !guard.unassigned_shards.is_empty()
        };
        self.publish(ShardingEvent::PodRegistered(address));

        if has_unassigned {
            self.rebalance(false).await;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.persist_pods().await });
    }

    /// Remove a pod from the directory, releasing its shards. Unknown pods
    /// are ignored. Failover rebalancing runs detached so callers are not
    /// held up by pod RPCs.
    #[instrument(skip(self))]
    pub async fn unregister(self: &Arc<Self>, address: &PodAddress) {
        let owned = {
            let mut guard = self.state.write().await;
            if !guard.has_pod(address) {
                debug!(pod = %address, "Ignoring unregister for unknown pod");
                return;
            }
            let mut pods = guard.pods.clone();
            pods.remove(address);
            let mut shards = guard.shards.clone();
            let mut owned = BTreeSet::new();
            for (shard, owner) in shards.iter_mut() {
                if owner.as_ref() == Some(address) {
                    owned.insert(*shard);
                    *owner = None;
                }
            }
            *guard = ClusterState::new(pods, shards);
            owned
        };

        info!(pod = %address, released = owned.len(), "Unregistering pod");
        self.publish(ShardingEvent::PodUnregistered(address.clone()));
        if !owned.is_empty() {
            self.publish(ShardingEvent::ShardsUnassigned(address.clone(), owned));
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.persist_pods().await });
        let this = Arc::clone(self);
        tokio::spawn(async move { this.rebalance(true).await });
    }

    /// Probe a pod reported as unhealthy and unregister it if the probe
    /// agrees. Always publishes `PodHealthChecked` so observers can track
    /// probe activity.
    pub async fn notify_unhealthy_pod(self: &Arc<Self>, address: &PodAddress) {
        if !self.state.read().await.has_pod(address) {
            return;
        }
        self.publish(ShardingEvent::PodHealthChecked(address.clone()));
        if !self.health.is_alive(address).await {
            warn!(pod = %address, "Pod failed its health probe, unregistering");
            self.unregister(address).await;
        }
    }

    /// Probe every registered pod, with bounded concurrency.
    pub async fn check_all_pods_health(self: &Arc<Self>) {
        let addresses: Vec<PodAddress> = self.state.read().await.pods.keys().cloned().collect();
        stream::iter(addresses)
            .for_each_concurrent(self.config.rpc_concurrency, |address| {
                let this = Arc::clone(self);
                async move { this.notify_unhealthy_pod(&address).await }
            })
            .await;
    }

    /// Current shard assignment table.
    pub async fn get_assignments(&self) -> BTreeMap<ShardId, Option<PodAddress>> {
        self.state.read().await.shards.clone()
    }

    /// Snapshot of the full cluster state.
    pub async fn cluster_state(&self) -> ClusterState {
        self.state.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShardingEvent> {
        self.events.subscribe()
    }

    /// Run one rebalance round. `immediate` skips the per-round rate limit
    /// and enables the delayed retry on failure; it is used for failover,
    /// while the periodic loop passes `false`.
    ///
    /// Boxed because failed immediate rounds re-enter through a spawned
    /// retry.
    pub fn rebalance(self: &Arc<Self>, immediate: bool) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        Box::pin(async move { this.rebalance_inner(immediate).await })
    }

    async fn rebalance_inner(self: Arc<Self>, immediate: bool) {
        let _round = self.rebalance_gate.lock().await;

        let snapshot = self.state.read().await.clone();
        let decision = if immediate || !snapshot.unassigned_shards.is_empty() {
            decide_assignments_for_unassigned_shards(&snapshot)
        } else {
            decide_assignments_for_unbalanced_shards(&snapshot, self.config.rebalance_rate)
        };
        if decision.is_empty() {
            debug!(immediate, "Rebalance round found nothing to move");
            return;
        }
        info!(immediate, decision = %decision.summary(), "Rebalancing shards");

        // Ping every pod the decision touches before moving anything; a
        // shard must not be unassigned from its current owner if its new
        // owner is already down.
        let failed_pings: BTreeSet<PodAddress> = stream::iter(decision.referenced_pods())
            .map(|address| {
                let pods = Arc::clone(&self.pods);
                let timeout = self.config.ping_timeout();
                async move {
                    let alive = matches!(
                        tokio::time::timeout(timeout, pods.ping(&address)).await,
                        Ok(Ok(()))
                    );
                    (address, alive)
                }
            })
            .buffer_unordered(self.config.rpc_concurrency)
            .filter_map(|(address, alive)| async move { (!alive).then_some(address) })
            .collect()
            .await;
        let shards_to_skip = decision.shards_on(&failed_pings);

        let mut failed_pods = failed_pings.clone();
        let mut failed_shards: BTreeSet<ShardId> = BTreeSet::new();
        let mut changed = false;

        for (address, shards) in &decision.unassignments {
            if failed_pings.contains(address) {
                continue;
            }
            let shards: BTreeSet<ShardId> =
                shards.difference(&shards_to_skip).copied().collect();
            if shards.is_empty() {
                continue;
            }
            match self.pods.unassign_shards(address, &shards).await {
                Ok(()) => match self.update_shards_state(&shards, None).await {
                    Ok(()) => {
                        changed = true;
                        self.publish(ShardingEvent::ShardsUnassigned(address.clone(), shards))
                    }
                    Err(error) => {
                        warn!(pod = %address, error = %error, "Failed to record unassignment");
                        failed_shards.extend(shards);
                    }
                },
                Err(error) => {
                    warn!(pod = %address, error = %error, "Failed to unassign shards");
                    failed_pods.insert(address.clone());
                    failed_shards.extend(shards);
                }
            }
        }

        for (address, shards) in &decision.assignments {
            // A pod that already failed any RPC this round receives nothing
            if failed_pods.contains(address) {
                continue;
            }
            let shards: BTreeSet<ShardId> = shards
                .iter()
                .filter(|shard| !shards_to_skip.contains(shard) && !failed_shards.contains(shard))
                .copied()
                .collect();
            if shards.is_empty() {
                continue;
            }
            match self.pods.assign_shards(address, &shards).await {
                Ok(()) => match self.update_shards_state(&shards, Some(address.clone())).await {
                    Ok(()) => {
                        changed = true;
                        self.publish(ShardingEvent::ShardsAssigned(address.clone(), shards))
                    }
                    Err(error) => {
                        warn!(pod = %address, error = %error, "Failed to record assignment");
                        failed_shards.extend(shards);
                    }
                },
                Err(error) => {
                    warn!(pod = %address, error = %error, "Failed to assign shards");
                    failed_pods.insert(address.clone());
                    failed_shards.extend(shards);
                }
            }
        }

        for address in &failed_pods {
            let this = Arc::clone(&self);
            let address = address.clone();
            tokio::spawn(async move { this.notify_unhealthy_pod(&address).await });
        }

        let had_failures = !failed_pods.is_empty() || !failed_shards.is_empty();
        if had_failures && immediate {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(this.config.rebalance_retry_interval()).await;
                this.rebalance(immediate).await;
            });
        }

        if changed {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.persist_assignments().await });
        }
    }

    /// Point the given shards at `pod` (or back to unassigned). Rejects the
    /// update if the pod was unregistered since the decision was made.
    async fn update_shards_state(
        &self,
        shards: &BTreeSet<ShardId>,
        pod: Option<PodAddress>,
    ) -> Result<()> {
        let mut guard = self.state.write().await;
        if let Some(address) = &pod {
            if !guard.has_pod(address) {
                return Err(ShardingError::PodNoLongerRegistered(address.clone()));
            }
        }
        let mut table = guard.shards.clone();
        for shard in shards {
            table.insert(*shard, pod.clone());
        }
        *guard = ClusterState::new(guard.pods.clone(), table);
        Ok(())
    }

    pub(crate) async fn persist_pods(&self) {
        let pods: BTreeMap<PodAddress, Pod> = self
            .state
            .read()
            .await
            .pods
            .iter()
            .map(|(address, meta)| (address.clone(), meta.pod.clone()))
            .collect();
        self.persist("pods", || self.storage.save_pods(&pods)).await;
    }

    pub(crate) async fn persist_assignments(&self) {
        let assignments = self.state.read().await.shards.clone();
        self.persist("assignments", || self.storage.save_assignments(&assignments))
            .await;
    }

    /// Bounded-retry save. Exhausting the retries logs an error and gives
    /// up; the next state change will try again with fresher data.
    async fn persist<F, Fut>(&self, what: &str, save: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        for attempt in 0..=self.config.persist_retry_count {
            match save().await {
                Ok(()) => return,
                Err(error) => {
                    warn!(what, attempt, error = %error, "Failed to persist");
                    if attempt < self.config.persist_retry_count {
                        tokio::time::sleep(self.config.persist_retry_interval()).await;
                    }
                }
            }
        }
        tracing::error!(what, "Giving up on persisting after retries");
    }

    fn publish(&self, event: ShardingEvent) {
        // Send only fails when nobody is subscribed, which is fine
        let _ = self.events.send(event);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

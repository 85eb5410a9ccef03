//! Pods API
//!
//! Per-pod RPC contract consumed by the Shard Manager, plus a liveness
//! probe seam. The wire transport is a collaborator concern; implementations
//! here are in-process ones used by tests and the demo binary.

use async_trait::async_trait;
use futures::stream::BoxStream;
use shardcast_core::{Envelope, PodAddress, Result, ShardId, ShardingError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// RPC surface of a single pod, as seen by the Shard Manager.
#[async_trait]
pub trait Pods: Send + Sync {
    /// Liveness ping; resolves Ok when the pod answered.
    async fn ping(&self, pod: &PodAddress) -> Result<()>;

    /// Notify a pod that it now owns the given shards.
    async fn assign_shards(&self, pod: &PodAddress, shards: &BTreeSet<ShardId>) -> Result<()>;

    /// Notify a pod that it no longer owns the given shards.
    async fn unassign_shards(&self, pod: &PodAddress, shards: &BTreeSet<ShardId>) -> Result<()>;

    /// Point-to-point message delivery; resolves to the encoded reply, if
    /// the receiving entity produced one.
    async fn send_message(&self, pod: &PodAddress, envelope: Envelope) -> Result<Option<Vec<u8>>>;

    /// Streaming variant of `send_message`; the receiving entity may push
    /// any number of encoded response chunks.
    async fn send_message_streaming(
        &self,
        pod: &PodAddress,
        envelope: Envelope,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>>;
}

/// External liveness probe used to decide whether a silent pod should be
/// unregistered.
#[async_trait]
pub trait PodsHealth: Send + Sync {
    async fn is_alive(&self, pod: &PodAddress) -> bool;
}

/// Health probe that considers a pod alive when it answers a ping within
/// the timeout.
pub struct PingPodsHealth {
    pods: Arc<dyn Pods>,
    timeout: Duration,
}

impl PingPodsHealth {
    pub fn new(pods: Arc<dyn Pods>, timeout: Duration) -> Self {
        Self { pods, timeout }
    }
}

#[async_trait]
impl PodsHealth for PingPodsHealth {
    async fn is_alive(&self, pod: &PodAddress) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, self.pods.ping(pod)).await,
            Ok(Ok(()))
        )
    }
}

/// In-process Pods implementation: records assignments per pod and lets
/// tests mark pods unreachable.
#[derive(Default)]
pub struct LoopbackPods {
    assignments: RwLock<BTreeMap<PodAddress, BTreeSet<ShardId>>>,
    unreachable: RwLock<BTreeSet<PodAddress>>,
    fail_unassign: AtomicBool,
}

impl LoopbackPods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent unassign RPC fail (or succeed again) while the
    /// pod stays otherwise reachable.
    pub fn set_fail_unassign(&self, fail: bool) {
        self.fail_unassign.store(fail, Ordering::SeqCst);
    }

    /// Mark a pod unreachable (or reachable again) for subsequent RPCs.
    pub async fn set_unreachable(&self, pod: &PodAddress, unreachable: bool) {
        let mut guard = self.unreachable.write().await;
        if unreachable {
            guard.insert(pod.clone());
        } else {
            guard.remove(pod);
        }
    }

    /// Shards the pod believes it owns.
    pub async fn assigned(&self, pod: &PodAddress) -> BTreeSet<ShardId> {
        self.assignments
            .read()
            .await
            .get(pod)
            .cloned()
            .unwrap_or_default()
    }

    async fn check_reachable(&self, pod: &PodAddress) -> Result<()> {
        if self.unreachable.read().await.contains(pod) {
            Err(ShardingError::PodUnreachable(pod.clone()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Pods for LoopbackPods {
    async fn ping(&self, pod: &PodAddress) -> Result<()> {
        self.check_reachable(pod).await
    }

    async fn assign_shards(&self, pod: &PodAddress, shards: &BTreeSet<ShardId>) -> Result<()> {
        self.check_reachable(pod).await?;
        self.assignments
            .write()
            .await
            .entry(pod.clone())
            .or_default()
            .extend(shards.iter().copied());
        Ok(())
    }

    async fn unassign_shards(&self, pod: &PodAddress, shards: &BTreeSet<ShardId>) -> Result<()> {
        self.check_reachable(pod).await?;
        if self.fail_unassign.load(Ordering::SeqCst) {
            return Err(ShardingError::Internal("unassign rejected".to_string()));
        }
        if let Some(owned) = self.assignments.write().await.get_mut(pod) {
            for shard in shards {
                owned.remove(shard);
            }
        }
        Ok(())
    }

    async fn send_message(&self, pod: &PodAddress, envelope: Envelope) -> Result<Option<Vec<u8>>> {
        self.check_reachable(pod).await?;
        // No entity host is wired in-process; treat as fire-and-forget
        debug!(pod = %pod, entity = %envelope.entity_id, "Loopback message dropped");
        Ok(None)
    }

    async fn send_message_streaming(
        &self,
        pod: &PodAddress,
        envelope: Envelope,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        self.check_reachable(pod).await?;
        debug!(pod = %pod, entity = %envelope.entity_id, "Loopback stream opened empty");
        Ok(Box::pin(futures::stream::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_assign_and_unassign() {
        let pods = LoopbackPods::new();
        let pod = PodAddress::new("a", 1);
        let shards = BTreeSet::from([ShardId(1), ShardId(2)]);

        pods.assign_shards(&pod, &shards).await.unwrap();
        assert_eq!(pods.assigned(&pod).await, shards);

        pods.unassign_shards(&pod, &BTreeSet::from([ShardId(1)]))
            .await
            .unwrap();
        assert_eq!(pods.assigned(&pod).await, BTreeSet::from([ShardId(2)]));
    }

    #[tokio::test]
    async fn test_loopback_unreachable_pod_fails_rpcs() {
        let pods = LoopbackPods::new();
        let pod = PodAddress::new("a", 1);
        pods.set_unreachable(&pod, true).await;

        assert!(pods.ping(&pod).await.is_err());
        assert!(pods
            .assign_shards(&pod, &BTreeSet::from([ShardId(1)]))
            .await
            .is_err());

        pods.set_unreachable(&pod, false).await;
        assert!(pods.ping(&pod).await.is_ok());
    }

    #[tokio::test]
    async fn test_ping_health_probe() {
        let pods = Arc::new(LoopbackPods::new());
        let health = PingPodsHealth::new(pods.clone(), Duration::from_millis(100));
        let pod = PodAddress::new("a", 1);

        assert!(health.is_alive(&pod).await);
        pods.set_unreachable(&pod, true).await;
        assert!(!health.is_alive(&pod).await);
    }
}

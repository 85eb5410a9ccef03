//! Shard Manager Integration Tests
//!
//! Tests the full control plane against in-process collaborators: pod
//! registration, failover, rolling upgrades and state recovery.
//!
//! Run with: cargo test --test cluster_test

use shardcast_core::{Pod, PodAddress, ShardingEvent};
use shardcast_manager::{
    LoopbackPods, ManagerConfig, MemoryStorage, PingPodsHealth, ShardManager, Storage,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

fn test_config(number_of_shards: u32) -> ManagerConfig {
    ManagerConfig {
        number_of_shards,
        // unthrottled so single rounds converge
        rebalance_rate: 1.0,
        ping_timeout_millis: 100,
        persist_retry_interval_millis: 1,
        ..Default::default()
    }
}

struct Cluster {
    manager: Arc<ShardManager>,
    pods: Arc<LoopbackPods>,
    storage: Arc<MemoryStorage>,
}

fn cluster(number_of_shards: u32) -> Cluster {
    let pods = Arc::new(LoopbackPods::new());
    let storage = Arc::new(MemoryStorage::new());
    Cluster {
        manager: manager_on(number_of_shards, &pods, &storage),
        pods,
        storage,
    }
}

fn manager_on(
    number_of_shards: u32,
    pods: &Arc<LoopbackPods>,
    storage: &Arc<MemoryStorage>,
) -> Arc<ShardManager> {
    let health = Arc::new(PingPodsHealth::new(
        pods.clone(),
        Duration::from_millis(100),
    ));
    ShardManager::new(
        pods.clone(),
        health,
        storage.clone(),
        test_config(number_of_shards),
    )
}

fn pod(host: &str, version: &str) -> Pod {
    Pod::new(PodAddress::new(host, 54321), version)
}

fn address(host: &str) -> PodAddress {
    PodAddress::new(host, 54321)
}

/// Poll a condition until it holds, for work the manager runs detached
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Test that sequential registrations level the shard space evenly
#[tokio::test]
async fn test_registrations_balance_the_cluster() {
    let c = cluster(9);
    c.manager.register(pod("a", "1.0.0")).await;
    c.manager.register(pod("b", "1.0.0")).await;
    c.manager.register(pod("c", "1.0.0")).await;

    let state = c.manager.cluster_state().await;
    assert!(state.unassigned_shards.is_empty());
    for host in ["a", "b", "c"] {
        assert_eq!(state.shards_owned_by(&address(host)).len(), 3);
        assert_eq!(c.pods.assigned(&address(host)).await.len(), 3);
    }

    println!("Cluster balance after registration: OK");
}

/// Test that a failed pod's shards move to the survivors
#[tokio::test]
async fn test_failover_reassigns_shards() {
    let c = cluster(6);
    c.manager.register(pod("a", "1.0.0")).await;
    c.manager.register(pod("b", "1.0.0")).await;

    c.pods.set_unreachable(&address("a"), true).await;
    c.manager.notify_unhealthy_pod(&address("a")).await;

    // Failover rebalancing runs detached from unregister
    let recovered = eventually(|| async {
        let state = c.manager.cluster_state().await;
        !state.has_pod(&address("a")) && state.shards_owned_by(&address("b")).len() == 6
    })
    .await;
    assert!(recovered, "shards were not reassigned to the survivor");

    println!("Failover reassignment: OK");
}

/// Test that stale-version pods gain no shards during a rolling upgrade
#[tokio::test]
async fn test_rolling_upgrade_prefers_new_version() {
    let c = cluster(4);
    c.manager.register(pod("old-a", "1.0.0")).await;
    c.manager.register(pod("old-b", "1.0.0")).await;
    c.manager.register(pod("new", "2.0.0")).await;

    // Mixed versions freeze load rebalancing, so the new pod starts empty
    let state = c.manager.cluster_state().await;
    assert!(state.shards_owned_by(&address("new")).is_empty());

    // Once a pod fails, its shards may only land on max-version pods
    c.pods.set_unreachable(&address("old-a"), true).await;
    c.manager.notify_unhealthy_pod(&address("old-a")).await;

    let upgraded = eventually(|| async {
        let state = c.manager.cluster_state().await;
        state.unassigned_shards.is_empty() && !state.has_pod(&address("old-a"))
    })
    .await;
    assert!(upgraded);

    let state = c.manager.cluster_state().await;
    let before = c.manager.cluster_state().await.shards_owned_by(&address("old-b"));
    assert_eq!(before.len(), 2, "the remaining stale pod gained shards");
    assert_eq!(state.shards_owned_by(&address("new")).len(), 2);

    println!("Rolling upgrade placement: OK");
}

/// Test that a restarted manager recovers its state from storage
#[tokio::test]
async fn test_recovery_from_persisted_state() {
    let c = cluster(4);
    c.manager.register(pod("a", "1.0.0")).await;
    c.manager.register(pod("b", "1.0.0")).await;

    // Saves are write-behind; wait for both tables to land
    let persisted = eventually(|| async {
        let pods = c.storage.get_pods().await.unwrap_or_default();
        let assignments = c.storage.get_assignments().await.unwrap_or_default();
        pods.len() == 2 && assignments.values().all(|owner| owner.is_some())
    })
    .await;
    assert!(persisted, "state was never persisted");

    let expected = c.manager.get_assignments().await;

    // Pod b dies while the manager is down
    c.pods.set_unreachable(&address("b"), true).await;
    let restarted = manager_on(4, &c.pods, &c.storage);
    restarted.recover().await;

    let state = restarted.cluster_state().await;
    assert!(state.has_pod(&address("a")));
    assert!(!state.has_pod(&address("b")));
    for (shard, owner) in &state.shards {
        if expected[shard] == Some(address("a")) {
            assert_eq!(owner.as_ref(), Some(&address("a")));
        } else {
            assert!(owner.is_none(), "shard {shard} kept a dead owner");
        }
    }

    println!("Recovery from storage: OK");
}

/// Test the event sequence for a register/unregister round trip
#[tokio::test]
async fn test_event_stream_round_trip() {
    let c = cluster(2);
    let mut events = c.manager.subscribe();

    c.manager.register(pod("a", "1.0.0")).await;
    c.manager.unregister(&address("a")).await;

    assert_eq!(
        events.recv().await.unwrap(),
        ShardingEvent::PodRegistered(address("a"))
    );
    let assigned = events.recv().await.unwrap();
    assert!(matches!(assigned, ShardingEvent::ShardsAssigned(_, _)));
    assert_eq!(
        events.recv().await.unwrap(),
        ShardingEvent::PodUnregistered(address("a"))
    );
    let released = events.recv().await.unwrap();
    match released {
        ShardingEvent::ShardsUnassigned(pod, shards) => {
            assert_eq!(pod, address("a"));
            assert_eq!(shards.len(), 2);
        }
        other => panic!("unexpected event {other}"),
    }

    println!("Event stream round trip: OK");
}

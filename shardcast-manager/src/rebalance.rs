//! Rebalance Engine
//!
//! Pure decision functions over a `ClusterState` snapshot. Given the same
//! snapshot they always produce the same decision: candidate shards are
//! processed in ascending shard-id order and ties between equally-loaded
//! pods are broken by pod address, so rounds are reproducible in tests.

use shardcast_core::{compare_version, ClusterState, PodAddress, ShardId};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Assignment and unassignment batches produced by one decision, grouped by
/// target pod. Applying the unassignments first and then the assignments
/// moves the cluster toward balance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceDecision {
    pub assignments: BTreeMap<PodAddress, BTreeSet<ShardId>>,
    pub unassignments: BTreeMap<PodAddress, BTreeSet<ShardId>>,
}

impl RebalanceDecision {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.unassignments.is_empty()
    }

    /// Every pod referenced by either batch.
    pub fn referenced_pods(&self) -> BTreeSet<PodAddress> {
        self.assignments
            .keys()
            .chain(self.unassignments.keys())
            .cloned()
            .collect()
    }

    /// Shards referenced on any of the given pods, in either batch.
    pub fn shards_on(&self, pods: &BTreeSet<PodAddress>) -> BTreeSet<ShardId> {
        self.assignments
            .iter()
            .chain(self.unassignments.iter())
            .filter(|(pod, _)| pods.contains(*pod))
            .flat_map(|(_, shards)| shards.iter().copied())
            .collect()
    }

    /// Summary of the decision
    pub fn summary(&self) -> String {
        let assigned: usize = self.assignments.values().map(|shards| shards.len()).sum();
        let unassigned: usize = self.unassignments.values().map(|shards| shards.len()).sum();
        format!(
            "{} shards to assign across {} pods, {} shards to unassign from {} pods",
            assigned,
            self.assignments.len(),
            unassigned,
            self.unassignments.len()
        )
    }
}

/// Rebalance every currently-unassigned shard immediately, with no per-round
/// throttling.
pub fn decide_assignments_for_unassigned_shards(state: &ClusterState) -> RebalanceDecision {
    let shards: Vec<ShardId> = state.unassigned_shards.iter().copied().collect();
    pick_new_pods(&shards, state, true, 1.0)
}

/// Move shards off overloaded pods, throttled by `rebalance_rate`. Never
/// rebalances for load while a rolling upgrade is in progress; failover and
/// new-pod cases go through the unassigned path instead.
pub fn decide_assignments_for_unbalanced_shards(
    state: &ClusterState,
    rebalance_rate: f64,
) -> RebalanceDecision {
    if !state.all_pods_have_max_version {
        return RebalanceDecision::default();
    }

    // For each pod, the first `extra` of its shards in ascending id order
    // are candidates to move. Ascending id keeps the selection stable
    // within a round.
    let mut candidates: Vec<ShardId> = Vec::new();
    for owned in state.shards_per_pod.values() {
        let extra = owned.len().saturating_sub(state.average_shards_per_pod);
        candidates.extend(owned.iter().take(extra).copied());
    }
    candidates.sort_unstable();

    pick_new_pods(&candidates, state, false, rebalance_rate)
}

/// Greedy allocator: walks the candidate shards one at a time against a
/// running per-pod tally, committing a move only when it strictly reduces
/// imbalance.
fn pick_new_pods(
    shards_to_rebalance: &[ShardId],
    state: &ClusterState,
    immediate: bool,
    rate: f64,
) -> RebalanceDecision {
    let mut per_pod: BTreeMap<PodAddress, BTreeSet<ShardId>> = state.shards_per_pod.clone();
    let mut decisions: Vec<(ShardId, PodAddress)> = Vec::new();

    for &shard in shards_to_rebalance {
        // Pods that already gave up a shard in this round must not receive
        // one, or a single round could oscillate.
        let sources: BTreeSet<PodAddress> = decisions
            .iter()
            .filter_map(|(moved, _)| state.shards.get(moved).cloned().flatten())
            .collect();

        let candidate = per_pod
            .iter()
            // stale pods never receive new shards
            .filter(|(pod, _)| match &state.max_version {
                None => true,
                Some(max) => state
                    .pods
                    .get(*pod)
                    .map(|meta| compare_version(&meta.version(), max) == Ordering::Equal)
                    .unwrap_or(false),
            })
            // throttle how much churn one round introduces
            .filter(|(pod, _)| {
                if immediate {
                    return true;
                }
                let tentative = decisions.iter().filter(|(_, chosen)| chosen == *pod).count();
                (tentative as f64) < state.shards.len() as f64 * rate
            })
            .filter(|(pod, _)| !sources.contains(*pod))
            .min_by_key(|(pod, owned)| (owned.len(), (*pod).clone()));

        let Some((pod, owned)) = candidate else {
            continue;
        };
        let chosen = pod.clone();
        let chosen_count = owned.len();

        let old_owner = state.shards.get(&shard).cloned().flatten();
        if old_owner.as_ref() == Some(&chosen) {
            continue;
        }
        // A move that would not leave the destination strictly below the
        // source's prior count is thrashing, skip it. An unassigned shard
        // has no source and always moves.
        let old_count = old_owner
            .as_ref()
            .map(|old| per_pod.get(old).map(|shards| shards.len()).unwrap_or(0))
            .unwrap_or(usize::MAX);
        if chosen_count + 1 >= old_count {
            continue;
        }

        if let Some(old) = &old_owner {
            if let Some(owned) = per_pod.get_mut(old) {
                owned.remove(&shard);
            }
        }
        per_pod.entry(chosen.clone()).or_default().insert(shard);
        decisions.push((shard, chosen));
    }

    let mut decision = RebalanceDecision::default();
    for (shard, pod) in &decisions {
        decision
            .assignments
            .entry(pod.clone())
            .or_default()
            .insert(*shard);
        if let Some(old) = state.shards.get(shard).cloned().flatten() {
            decision.unassignments.entry(old).or_default().insert(*shard);
        }
    }
    decision
}

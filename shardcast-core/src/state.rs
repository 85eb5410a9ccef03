//! Immutable cluster state snapshots
//!
//! A `ClusterState` is derived from (pods, shard -> pod mapping) and carries
//! cached views recomputed on every transition. Derived views are never
//! patched incrementally; callers replace the whole snapshot, which rules
//! out partial-update drift.

use crate::pod::{compare_version, PodAddress, PodWithMetadata};
use crate::shard::ShardId;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Cluster-wide view of pods and shard ownership.
///
/// Invariant: `shards` has exactly `number_of_shards` keys for every state
/// transition; a key's value is `None` while the shard is unassigned.
/// BTreeMap ordering makes every iteration over this state deterministic,
/// which the rebalance engine relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    pub pods: BTreeMap<PodAddress, PodWithMetadata>,
    pub shards: BTreeMap<ShardId, Option<PodAddress>>,

    // Derived views, recomputed by `new`
    pub unassigned_shards: BTreeSet<ShardId>,
    pub shards_per_pod: BTreeMap<PodAddress, BTreeSet<ShardId>>,
    pub max_version: Option<Vec<u32>>,
    pub all_pods_have_max_version: bool,
    pub average_shards_per_pod: usize,
}

impl ClusterState {
    /// Build a snapshot from a pod directory and an assignment table,
    /// recomputing every derived view.
    pub fn new(
        pods: BTreeMap<PodAddress, PodWithMetadata>,
        shards: BTreeMap<ShardId, Option<PodAddress>>,
    ) -> Self {
        let mut shards_per_pod: BTreeMap<PodAddress, BTreeSet<ShardId>> = pods
            .keys()
            .map(|address| (address.clone(), BTreeSet::new()))
            .collect();
        let mut unassigned_shards = BTreeSet::new();
        let mut assigned = 0usize;

        for (shard, owner) in &shards {
            match owner {
                Some(address) => {
                    shards_per_pod
                        .entry(address.clone())
                        .or_default()
                        .insert(*shard);
                    assigned += 1;
                }
                None => {
                    unassigned_shards.insert(*shard);
                }
            }
        }

        let versions: Vec<Vec<u32>> = pods.values().map(|meta| meta.version()).collect();
        let max_version = versions.iter().cloned().reduce(|current, candidate| {
            if compare_version(&current, &candidate) == Ordering::Less {
                candidate
            } else {
                current
            }
        });
        let all_pods_have_max_version = match &max_version {
            Some(max) => versions
                .iter()
                .all(|version| compare_version(version, max) == Ordering::Equal),
            None => true,
        };

        let average_shards_per_pod = if pods.is_empty() {
            0
        } else {
            assigned / pods.len()
        };

        Self {
            pods,
            shards,
            unassigned_shards,
            shards_per_pod,
            max_version,
            all_pods_have_max_version,
            average_shards_per_pod,
        }
    }

    /// State with no pods and every shard in `[1, number_of_shards]`
    /// unassigned.
    pub fn initial(number_of_shards: u32) -> Self {
        Self::new(BTreeMap::new(), unassigned_table(number_of_shards))
    }

    pub fn has_pod(&self, address: &PodAddress) -> bool {
        self.pods.contains_key(address)
    }

    /// Shards currently assigned to the given pod.
    pub fn shards_owned_by(&self, address: &PodAddress) -> BTreeSet<ShardId> {
        self.shards
            .iter()
            .filter(|(_, owner)| owner.as_ref() == Some(address))
            .map(|(shard, _)| *shard)
            .collect()
    }
}

/// Full `1..=number_of_shards -> unassigned` table.
pub fn unassigned_table(number_of_shards: u32) -> BTreeMap<ShardId, Option<PodAddress>> {
    (1..=number_of_shards)
        .map(|id| (ShardId(id), None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::Pod;

    fn pod_meta(host: &str, version: &str) -> (PodAddress, PodWithMetadata) {
        let address = PodAddress::new(host, 54321);
        let meta = PodWithMetadata::new(Pod::new(address.clone(), version), 0);
        (address, meta)
    }

    #[test]
    fn test_initial_state_has_all_shards_unassigned() {
        let state = ClusterState::initial(10);
        assert_eq!(state.shards.len(), 10);
        assert_eq!(state.unassigned_shards.len(), 10);
        assert_eq!(state.average_shards_per_pod, 0);
        assert!(state.max_version.is_none());
        assert!(state.all_pods_have_max_version);
    }

    #[test]
    fn test_derived_views() {
        let (addr_a, meta_a) = pod_meta("a", "1.0.0");
        let (addr_b, meta_b) = pod_meta("b", "1.0.0");
        let pods = BTreeMap::from([(addr_a.clone(), meta_a), (addr_b.clone(), meta_b)]);
        let mut shards = unassigned_table(6);
        shards.insert(ShardId(1), Some(addr_a.clone()));
        shards.insert(ShardId(2), Some(addr_a.clone()));
        shards.insert(ShardId(3), Some(addr_b.clone()));

        let state = ClusterState::new(pods, shards);

        assert_eq!(
            state.unassigned_shards,
            BTreeSet::from([ShardId(4), ShardId(5), ShardId(6)])
        );
        assert_eq!(state.shards_per_pod[&addr_a].len(), 2);
        assert_eq!(state.shards_per_pod[&addr_b].len(), 1);
        // 3 assigned / 2 pods, truncated
        assert_eq!(state.average_shards_per_pod, 1);
        assert_eq!(state.shards_owned_by(&addr_a).len(), 2);
    }

    #[test]
    fn test_zero_shard_pods_appear_in_shards_per_pod() {
        let (addr, meta) = pod_meta("idle", "1.0.0");
        let state = ClusterState::new(BTreeMap::from([(addr.clone(), meta)]), unassigned_table(4));
        assert!(state.shards_per_pod[&addr].is_empty());
    }

    #[test]
    fn test_max_version_during_rolling_upgrade() {
        let (addr_a, meta_a) = pod_meta("a", "1.2.0");
        let (addr_b, meta_b) = pod_meta("b", "1.10.0");
        let state = ClusterState::new(
            BTreeMap::from([(addr_a, meta_a), (addr_b, meta_b)]),
            unassigned_table(4),
        );
        assert_eq!(state.max_version, Some(vec![1, 10, 0]));
        assert!(!state.all_pods_have_max_version);
    }

    #[test]
    fn test_all_pods_have_max_version_with_equivalent_versions() {
        let (addr_a, meta_a) = pod_meta("a", "1.0");
        let (addr_b, meta_b) = pod_meta("b", "1.0.0");
        let state = ClusterState::new(
            BTreeMap::from([(addr_a, meta_a), (addr_b, meta_b)]),
            unassigned_table(4),
        );
        assert!(state.all_pods_have_max_version);
    }

    #[test]
    fn test_shard_key_count_is_preserved_across_transitions() {
        let (addr, meta) = pod_meta("a", "1.0.0");
        let state = ClusterState::initial(8);
        let mut shards = state.shards.clone();
        for shard in shards.values_mut() {
            *shard = Some(addr.clone());
        }
        let next = ClusterState::new(BTreeMap::from([(addr, meta)]), shards);
        assert_eq!(next.shards.len(), 8);
        assert!(next.unassigned_shards.is_empty());
    }
}

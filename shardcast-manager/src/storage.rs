//! Storage API
//!
//! Persistence seam for the pod directory and the shard assignment table.
//! All calls may fail; the Shard Manager wraps them with its own bounded
//! retries and tolerates total failure by skipping the save. The in-memory
//! implementation round-trips through the JSON layout used on the wire so
//! tests exercise real serialization.

use async_trait::async_trait;
use shardcast_core::{Pod, PodAddress, Result, ShardId, ShardingError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Persisted layout: both tables are keyed exactly as the in-memory model.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_pods(&self) -> Result<BTreeMap<PodAddress, Pod>>;

    async fn get_assignments(&self) -> Result<BTreeMap<ShardId, Option<PodAddress>>>;

    async fn save_pods(&self, pods: &BTreeMap<PodAddress, Pod>) -> Result<()>;

    async fn save_assignments(
        &self,
        assignments: &BTreeMap<ShardId, Option<PodAddress>>,
    ) -> Result<()>;
}

/// In-memory storage holding the serialized JSON documents, with a failure
/// switch for retry tests.
#[derive(Default)]
pub struct MemoryStorage {
    pods: RwLock<Option<String>>,
    assignments: RwLock<Option<String>>,
    fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn check_save(&self) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            Err(ShardingError::Storage("storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ShardingError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| ShardingError::Serialization(e.to_string()))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_pods(&self) -> Result<BTreeMap<PodAddress, Pod>> {
        match self.pods.read().await.as_deref() {
            None => Ok(BTreeMap::new()),
            Some(raw) => {
                let entries: Vec<(PodAddress, Pod)> = decode(raw)?;
                Ok(entries.into_iter().collect())
            }
        }
    }

    async fn get_assignments(&self) -> Result<BTreeMap<ShardId, Option<PodAddress>>> {
        match self.assignments.read().await.as_deref() {
            None => Ok(BTreeMap::new()),
            Some(raw) => {
                let entries: Vec<(ShardId, Option<PodAddress>)> = decode(raw)?;
                Ok(entries.into_iter().collect())
            }
        }
    }

    async fn save_pods(&self, pods: &BTreeMap<PodAddress, Pod>) -> Result<()> {
        self.check_save()?;
        let entries: Vec<(&PodAddress, &Pod)> = pods.iter().collect();
        *self.pods.write().await = Some(encode(&entries)?);
        Ok(())
    }

    async fn save_assignments(
        &self,
        assignments: &BTreeMap<ShardId, Option<PodAddress>>,
    ) -> Result<()> {
        self.check_save()?;
        let entries: Vec<(&ShardId, &Option<PodAddress>)> = assignments.iter().collect();
        *self.assignments.write().await = Some(encode(&entries)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_storage_reads_empty_tables() {
        let storage = MemoryStorage::new();
        assert!(storage.get_pods().await.unwrap().is_empty());
        assert!(storage.get_assignments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pods_roundtrip() {
        let storage = MemoryStorage::new();
        let address = PodAddress::new("a", 1);
        let pods = BTreeMap::from([(address.clone(), Pod::new(address, "1.0.0"))]);

        storage.save_pods(&pods).await.unwrap();
        assert_eq!(storage.get_pods().await.unwrap(), pods);
    }

    #[tokio::test]
    async fn test_assignments_roundtrip_preserves_unassigned() {
        let storage = MemoryStorage::new();
        let assignments = BTreeMap::from([
            (ShardId(1), Some(PodAddress::new("a", 1))),
            (ShardId(2), None),
        ]);

        storage.save_assignments(&assignments).await.unwrap();
        assert_eq!(storage.get_assignments().await.unwrap(), assignments);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let storage = MemoryStorage::new();
        storage.set_fail_saves(true);
        let err = storage.save_pods(&BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, ShardingError::Storage(_)));

        storage.set_fail_saves(false);
        assert!(storage.save_pods(&BTreeMap::new()).await.is_ok());
    }
}

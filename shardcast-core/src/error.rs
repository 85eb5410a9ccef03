//! Error types for Shardcast
//!
//! Provides a unified error type for coordinator operations. Nothing in the
//! core is allowed to crash the process on a single pod's failure or a
//! single entity's misbehavior; pod-level errors are contained inside the
//! Shard Manager, routing and queue errors are surfaced to callers.

use crate::pod::PodAddress;
use thiserror::Error;

/// Result type alias for Shardcast operations
pub type Result<T> = std::result::Result<T, ShardingError>;

/// Unified error type for Shardcast
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardingError {
    // ===== Routing Errors =====
    /// The entity's shard moved, or entity creation was rejected during
    /// shutdown. Callers should re-resolve ownership and retry elsewhere.
    #[error("Entity not managed by this pod: {0}")]
    EntityNotManagedByThisPod(String),

    // ===== Local Delivery Errors =====
    #[error("Message queue error: {0}")]
    MessageQueue(String),

    // ===== Rebalance-Internal Errors =====
    #[error("Pod unreachable: {0}")]
    PodUnreachable(PodAddress),

    #[error("Pod no longer registered: {0}")]
    PodNoLongerRegistered(PodAddress),

    // ===== Collaborator Errors =====
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShardingError::EntityNotManagedByThisPod("user-1".to_string());
        assert_eq!(err.to_string(), "Entity not managed by this pod: user-1");
    }

    #[test]
    fn test_pod_error_display() {
        let err = ShardingError::PodUnreachable(PodAddress::new("a", 1));
        assert_eq!(err.to_string(), "Pod unreachable: a:1");
    }
}

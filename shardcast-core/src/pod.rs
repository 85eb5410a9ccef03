//! Pod identity and version types
//!
//! A pod is one addressable member of the cluster that can own shards and
//! host entities. Pods are identified by their network endpoint and carry a
//! dotted-decimal version string used to detect rolling upgrades.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Network endpoint of a cluster member. Equality and ordering are by value;
/// the ordering is used as the deterministic tie-break throughout the
/// rebalance engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodAddress {
    pub host: String,
    pub port: u16,
}

impl PodAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PodAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A cluster member: address plus semantic version (e.g. "1.2.10").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub address: PodAddress,
    pub version: String,
}

impl Pod {
    pub fn new(address: PodAddress, version: impl Into<String>) -> Self {
        Self {
            address,
            version: version.into(),
        }
    }
}

impl fmt::Display for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.version)
    }
}

/// A registered pod with the wall-clock timestamp (millis) of registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodWithMetadata {
    pub pod: Pod,
    pub registered: u64,
}

impl PodWithMetadata {
    pub fn new(pod: Pod, registered: u64) -> Self {
        Self { pod, registered }
    }

    /// Parsed version components of the underlying pod.
    pub fn version(&self) -> Vec<u32> {
        extract_version(&self.pod.version)
    }
}

/// Split a dotted version string into numeric components. Components that
/// fail to parse count as 0.
pub fn extract_version(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map(|component| component.parse().unwrap_or(0))
        .collect()
}

/// Compare two parsed versions component-wise, left to right. A missing
/// trailing component is treated as 0, so "1.0" == "1.0.0". This is not a
/// lexicographic string comparison: "1.2" < "1.10".
pub fn compare_version(a: &[u32], b: &[u32]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_address_display() {
        let address = PodAddress::new("10.0.0.1", 54321);
        assert_eq!(address.to_string(), "10.0.0.1:54321");
    }

    #[test]
    fn test_pod_address_ordering_is_by_value() {
        let a = PodAddress::new("a", 1);
        let b = PodAddress::new("a", 2);
        let c = PodAddress::new("b", 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("1.2.10"), vec![1, 2, 10]);
        assert_eq!(extract_version("1.x.3"), vec![1, 0, 3]);
    }

    #[test]
    fn test_compare_version_numeric_not_lexicographic() {
        assert_eq!(compare_version(&[1, 2, 0], &[1, 10, 0]), Ordering::Less);
        assert_eq!(compare_version(&[1, 10, 0], &[1, 2, 0]), Ordering::Greater);
    }

    #[test]
    fn test_compare_version_missing_components_are_zero() {
        assert_eq!(compare_version(&[1, 0], &[1, 0, 0]), Ordering::Equal);
        assert_eq!(compare_version(&[1], &[1, 0, 1]), Ordering::Less);
        assert_eq!(compare_version(&[2], &[1, 9, 9]), Ordering::Greater);
    }

    #[test]
    fn test_pod_with_metadata_version() {
        let pod = Pod::new(PodAddress::new("h", 1), "2.0.1");
        let meta = PodWithMetadata::new(pod, 42);
        assert_eq!(meta.version(), vec![2, 0, 1]);
    }

    #[test]
    fn test_pod_serde_roundtrip() {
        let pod = Pod::new(PodAddress::new("node-1", 8080), "1.0.0");
        let json = serde_json::to_string(&pod).unwrap();
        let back: Pod = serde_json::from_str(&json).unwrap();
        assert_eq!(pod, back);
    }
}

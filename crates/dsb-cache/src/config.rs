use serde::{Deserialize, Serialize};

/// Configuration for [`InMemoryCache`](crate::InMemoryCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached entities; 0 means unbounded. The oldest
    /// entry is evicted first.
    pub max_entries: usize,
    /// Whether the layer may serve and receive reads inside a transaction.
    ///
    /// Only set this for a layer private to one client whose writes all go
    /// through that client, so it can never hold a value the store has
    /// since replaced.
    pub transaction_aware: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            transaction_aware: false,
        }
    }
}

impl CacheConfig {
    /// Unbounded, transaction-aware local cache.
    pub fn local() -> Self {
        Self {
            max_entries: 0,
            transaction_aware: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = CacheConfig::default();
        assert_eq!(c.max_entries, 10_000);
        assert!(!c.transaction_aware);
    }

    #[test]
    fn local_config() {
        let c = CacheConfig::local();
        assert_eq!(c.max_entries, 0);
        assert!(c.transaction_aware);
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use dsb_types::{Key, PropertyList};
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::layer::{CacheInfo, CacheLayer};

/// Entries are scoped per project so that clients for different projects can
/// share one layer.
type EntryKey = (String, Key);

#[derive(Default)]
struct Entries {
    /// Encoded entity plus the insertion sequence number of the entry.
    values: HashMap<EntryKey, (u64, Vec<u8>)>,
    /// Insertion order for eviction. Records whose sequence number no longer
    /// matches `values` are stale and skipped.
    order: VecDeque<(u64, EntryKey)>,
    next_seq: u64,
}

impl Entries {
    fn insert(&mut self, key: EntryKey, bytes: Vec<u8>) {
        if let Some(slot) = self.values.get_mut(&key) {
            slot.1 = bytes;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, key.clone()));
        self.values.insert(key, (seq, bytes));
    }

    fn remove(&mut self, key: &EntryKey) -> bool {
        let removed = self.values.remove(key).is_some();
        // Keep stale records bounded by the live entry count.
        if removed && self.order.len() > 2 * self.values.len() + 16 {
            let values = &self.values;
            self.order
                .retain(|(seq, key)| values.get(key).is_some_and(|(live, _)| live == seq));
        }
        removed
    }

    /// Remove and return the oldest live entry.
    fn pop_oldest(&mut self) -> Option<EntryKey> {
        while let Some((seq, key)) = self.order.pop_front() {
            if self.values.get(&key).is_some_and(|(live, _)| *live == seq) {
                self.values.remove(&key);
                return Some(key);
            }
        }
        None
    }
}

/// Counters for one cache layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub invalidations: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

/// In-memory cache layer.
///
/// Entities are stored bincode-encoded behind a `RwLock`, so readers always
/// get an independent copy. Bounded layers evict the oldest entry first.
pub struct InMemoryCache {
    name: String,
    config: CacheConfig,
    entries: RwLock<Entries>,
    counters: Counters,
}

impl InMemoryCache {
    /// A shared, non-transaction-aware layer with the default bound.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// An unbounded transaction-aware layer, private to one client.
    pub fn local() -> Self {
        Self::with_config(CacheConfig::local()).named("local")
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            name: "memory".into(),
            config,
            entries: RwLock::new(Entries::default()),
            counters: Counters::default(),
        }
    }

    /// Rename the layer (names appear in logs).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached for `project_id`.
    pub fn contains(&self, project_id: &str, key: &Key) -> bool {
        self.entries
            .read()
            .expect("lock poisoned")
            .values
            .contains_key(&(project_id.to_string(), key.clone()))
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.values.clear();
        entries.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            puts: load(&self.counters.puts),
            invalidations: load(&self.counters.invalidations),
            evictions: load(&self.counters.evictions),
        }
    }

    fn entry_key(info: &CacheInfo<'_>, key: &Key) -> EntryKey {
        (info.client.project_id.clone(), key.clone())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("name", &self.name)
            .field("entry_count", &self.len())
            .finish()
    }
}

impl CacheLayer for InMemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn transaction_aware(&self) -> bool {
        self.config.transaction_aware
    }

    fn get_multi(
        &self,
        info: &CacheInfo<'_>,
        keys: &[Key],
    ) -> CacheResult<Vec<Option<PropertyList>>> {
        let entries = self.entries.read().expect("lock poisoned");
        keys.iter()
            .map(|key| match entries.values.get(&Self::entry_key(info, key)) {
                Some((_, bytes)) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    bincode::deserialize(bytes)
                        .map(Some)
                        .map_err(|e| CacheError::Serialization(e.to_string()))
                }
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            })
            .collect()
    }

    fn put_multi(
        &self,
        info: &CacheInfo<'_>,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> CacheResult<()> {
        if keys.len() != entities.len() {
            return Err(CacheError::Misaligned {
                expected: keys.len(),
                actual: entities.len(),
            });
        }
        let encoded = entities
            .iter()
            .map(|entity| {
                bincode::serialize(entity).map_err(|e| CacheError::Serialization(e.to_string()))
            })
            .collect::<CacheResult<Vec<_>>>()?;

        let mut entries = self.entries.write().expect("lock poisoned");
        for (key, bytes) in keys.iter().zip(encoded) {
            entries.insert(Self::entry_key(info, key), bytes);
            self.counters.puts.fetch_add(1, Ordering::Relaxed);
        }
        let max = self.config.max_entries;
        while max > 0 && entries.values.len() > max {
            let Some(oldest) = entries.pop_oldest() else {
                break;
            };
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(layer = %self.name, key = %oldest.1, "evicted cache entry");
        }
        Ok(())
    }

    fn delete_multi(&self, info: &CacheInfo<'_>, keys: &[Key]) -> CacheResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        for key in keys {
            entries.remove(&Self::entry_key(info, key));
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

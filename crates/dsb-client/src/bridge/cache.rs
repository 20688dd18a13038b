use std::sync::Arc;

use dsb_cache::{CacheError, CacheInfo, CacheLayer, CacheOp};
use dsb_types::{DatastoreError, DatastoreResult, Key, MultiError, PendingKey, PropertyList};
use tracing::debug;

use crate::bridge::original::{check_lengths, OriginalStoreBridge};
use crate::bridge::transaction::TransactionBridge;

/// Read-through / write-around pipeline in front of the store.
///
/// Layers are consulted in registration order. A hit at layer `i` back-fills
/// layers `0..i`; keys no layer holds are fetched from the store in one batch
/// and then populate every layer in order. Inside a transaction every key is
/// read through the transaction and only transaction-aware layers are
/// refreshed.
///
/// Writes reach the store first. After the store accepts them,
/// transaction-aware layers are written through and every other layer is
/// invalidated. Deletes invalidate every layer. Layer failures go to
/// [`CacheLayer::report_error`] and never change the result of a call.
#[derive(Clone, Copy)]
pub struct CacheBridge<'a> {
    store: OriginalStoreBridge<'a>,
    layers: &'a [Arc<dyn CacheLayer>],
}

impl<'a> CacheBridge<'a> {
    pub fn new(store: OriginalStoreBridge<'a>, layers: &'a [Arc<dyn CacheLayer>]) -> Self {
        Self { store, layers }
    }

    /// The uncached store underneath the pipeline.
    pub fn store(&self) -> OriginalStoreBridge<'a> {
        self.store
    }

    // -----------------------------------------------------------------------
    // Non-transactional operations
    // -----------------------------------------------------------------------

    pub fn get_multi_without_tx(
        &self,
        info: &CacheInfo<'_>,
        keys: &[Key],
        dst: &mut [PropertyList],
    ) -> DatastoreResult<()> {
        check_lengths(keys.len(), dst.len())?;
        info.context.check()?;
        enter(CacheOp::Get, info, keys.len());
        self.read_through(info, keys, dst)
    }

    pub fn put_multi_without_tx(
        &self,
        info: &CacheInfo<'_>,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> DatastoreResult<Vec<Key>> {
        enter(CacheOp::Put, info, keys.len());
        match self.store.put_multi(info.context, keys, entities) {
            Ok(stored) => {
                let layers = self.eligible(info);
                let (aware, other): (Vec<_>, Vec<_>) =
                    layers.into_iter().partition(|layer| layer.transaction_aware());
                populate(info, &aware, &stored, entities);
                invalidate(info, &other, &stored);
                Ok(stored)
            }
            Err(DatastoreError::Multi(multi)) => {
                // Allocated keys are unknown for failed batches; only complete
                // keys that were written can have stale entries.
                let written = succeeded(keys, &multi, |key| !key.is_incomplete());
                invalidate(info, &self.eligible(info), &written);
                Err(DatastoreError::Multi(multi))
            }
            Err(err) => Err(err),
        }
    }

    pub fn delete_multi_without_tx(&self, info: &CacheInfo<'_>, keys: &[Key]) -> DatastoreResult<()> {
        enter(CacheOp::Delete, info, keys.len());
        match self.store.delete_multi(info.context, keys) {
            Ok(()) => {
                invalidate(info, &self.eligible(info), keys);
                Ok(())
            }
            Err(DatastoreError::Multi(multi)) => {
                let deleted = succeeded(keys, &multi, |_| true);
                invalidate(info, &self.eligible(info), &deleted);
                Err(DatastoreError::Multi(multi))
            }
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Transactional operations
    // -----------------------------------------------------------------------

    /// Read every key through the transaction, then refresh the
    /// transaction-aware layers with what it returned.
    ///
    /// No layer answers a transactional read: the driver must see each key
    /// to detect conflicting writes at commit.
    ///
    /// Fails with [`DatastoreError::UnexpectedContext`] when `tx` is `None`.
    pub fn get_multi_with_tx(
        &self,
        info: &CacheInfo<'_>,
        tx: Option<&TransactionBridge<'_>>,
        keys: &[Key],
        dst: &mut [PropertyList],
    ) -> DatastoreResult<()> {
        let tx = tx.ok_or(DatastoreError::UnexpectedContext)?;
        check_lengths(keys.len(), dst.len())?;
        info.context.check()?;
        let info = info.transactional();
        enter(CacheOp::Get, &info, keys.len());

        let result = tx.get_multi(keys, dst);
        let loaded: Vec<usize> = match &result {
            Ok(()) => (0..keys.len()).collect(),
            Err(DatastoreError::Multi(multi)) => {
                (0..keys.len()).filter(|&i| multi.get(i).is_none()).collect()
            }
            Err(_) => Vec::new(),
        };
        let fill_keys: Vec<Key> = loaded.iter().map(|&i| keys[i].clone()).collect();
        let fill_entities: Vec<PropertyList> = loaded.iter().map(|&i| dst[i].clone()).collect();
        populate(&info, &self.eligible(&info), &fill_keys, &fill_entities);
        result
    }

    /// Buffer writes in the transaction and drop transaction-aware entries
    /// for the written keys.
    pub fn put_multi_with_tx(
        &self,
        info: &CacheInfo<'_>,
        tx: Option<&TransactionBridge<'_>>,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> DatastoreResult<Vec<PendingKey>> {
        let tx = tx.ok_or(DatastoreError::UnexpectedContext)?;
        let info = info.transactional();
        enter(CacheOp::Put, &info, keys.len());
        let pending = tx.put_multi(keys, entities)?;
        let complete: Vec<Key> = keys.iter().filter(|k| !k.is_incomplete()).cloned().collect();
        invalidate(&info, &self.eligible(&info), &complete);
        Ok(pending)
    }

    pub fn delete_multi_with_tx(
        &self,
        info: &CacheInfo<'_>,
        tx: Option<&TransactionBridge<'_>>,
        keys: &[Key],
    ) -> DatastoreResult<()> {
        let tx = tx.ok_or(DatastoreError::UnexpectedContext)?;
        let info = info.transactional();
        enter(CacheOp::Delete, &info, keys.len());
        tx.delete_multi(keys)?;
        invalidate(&info, &self.eligible(&info), keys);
        Ok(())
    }

    /// Invalidate `keys` in every layer, e.g. after a commit.
    pub fn invalidate_all(&self, info: &CacheInfo<'_>, keys: &[Key]) {
        let layers: Vec<&dyn CacheLayer> = self.layers.iter().map(|l| &**l).collect();
        invalidate(info, &layers, keys);
    }

    // -----------------------------------------------------------------------
    // Pipeline internals
    // -----------------------------------------------------------------------

    fn eligible(&self, info: &CacheInfo<'_>) -> Vec<&'a dyn CacheLayer> {
        self.layers
            .iter()
            .map(|layer| &**layer)
            .filter(|layer| !info.in_transaction || layer.transaction_aware())
            .collect()
    }

    fn read_through(
        &self,
        info: &CacheInfo<'_>,
        keys: &[Key],
        dst: &mut [PropertyList],
    ) -> DatastoreResult<()> {
        let layers = self.eligible(info);
        let mut missing: Vec<usize> = (0..keys.len()).collect();

        for (depth, layer) in layers.iter().enumerate() {
            if missing.is_empty() {
                break;
            }
            let lookup: Vec<Key> = missing.iter().map(|&i| keys[i].clone()).collect();
            let found = match layer.get_multi(info, &lookup) {
                Ok(found) if found.len() == lookup.len() => found,
                Ok(found) => {
                    let err = CacheError::Misaligned {
                        expected: lookup.len(),
                        actual: found.len(),
                    };
                    layer.report_error(CacheOp::Get, &err);
                    continue;
                }
                Err(err) => {
                    layer.report_error(CacheOp::Get, &err);
                    continue;
                }
            };

            let mut hits = Vec::new();
            let mut still_missing = Vec::new();
            for (slot, &i) in found.into_iter().zip(&missing) {
                match slot {
                    Some(entity) => {
                        dst[i] = entity;
                        hits.push(i);
                    }
                    None => still_missing.push(i),
                }
            }
            debug!(
                layer = layer.name(),
                hits = hits.len(),
                misses = still_missing.len(),
                "cache lookup"
            );
            if depth > 0 && !hits.is_empty() {
                let hit_keys: Vec<Key> = hits.iter().map(|&i| keys[i].clone()).collect();
                let hit_entities: Vec<PropertyList> = hits.iter().map(|&i| dst[i].clone()).collect();
                populate(info, &layers[..depth], &hit_keys, &hit_entities);
            }
            missing = still_missing;
        }

        if missing.is_empty() {
            return Ok(());
        }

        let miss_keys: Vec<Key> = missing.iter().map(|&i| keys[i].clone()).collect();
        let mut loaded = vec![PropertyList::new(); miss_keys.len()];
        let slot_errors = match self.store.get_multi(info.context, &miss_keys, &mut loaded) {
            Ok(()) => vec![None; miss_keys.len()],
            Err(DatastoreError::Multi(multi)) if multi.len() == miss_keys.len() => {
                multi.into_slots()
            }
            Err(err) => return Err(err),
        };

        let mut errors = MultiError::new(keys.len());
        let mut fill_keys = Vec::new();
        let mut fill_entities = Vec::new();
        for ((&i, entity), slot_error) in missing.iter().zip(loaded).zip(slot_errors) {
            match slot_error {
                Some(err) => errors.set(i, err),
                None => {
                    dst[i] = entity.clone();
                    fill_keys.push(keys[i].clone());
                    fill_entities.push(entity);
                }
            }
        }
        populate(info, &layers, &fill_keys, &fill_entities);
        errors.into_result()
    }
}

fn enter(op: CacheOp, info: &CacheInfo<'_>, batch: usize) {
    debug!(op = %op, batch, in_transaction = info.in_transaction, "cache bridge");
}

/// Keys of the slots that did not fail and pass `keep`.
fn succeeded(keys: &[Key], multi: &MultiError, keep: impl Fn(&Key) -> bool) -> Vec<Key> {
    keys.iter()
        .enumerate()
        .filter(|(i, key)| multi.get(*i).is_none() && keep(key))
        .map(|(_, key)| key.clone())
        .collect()
}

fn populate(
    info: &CacheInfo<'_>,
    layers: &[&dyn CacheLayer],
    keys: &[Key],
    entities: &[PropertyList],
) {
    if keys.is_empty() {
        return;
    }
    for layer in layers {
        if let Err(err) = layer.put_multi(info, keys, entities) {
            layer.report_error(CacheOp::Put, &err);
        }
    }
}

fn invalidate(info: &CacheInfo<'_>, layers: &[&dyn CacheLayer], keys: &[Key]) {
    if keys.is_empty() {
        return;
    }
    for layer in layers {
        if let Err(err) = layer.delete_multi(info, keys) {
            layer.report_error(CacheOp::Delete, &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use dsb_cache::{CacheResult, ClientInfo, InMemoryCache};
    use dsb_driver::{DriverClient, InMemoryDriver};
    use dsb_types::Context;

    /// A layer whose every hook fails.
    struct BrokenLayer {
        reported: AtomicU64,
    }

    impl CacheLayer for BrokenLayer {
        fn name(&self) -> &str {
            "broken"
        }

        fn get_multi(
            &self,
            _info: &CacheInfo<'_>,
            _keys: &[Key],
        ) -> CacheResult<Vec<Option<PropertyList>>> {
            Err(CacheError::Backend("connection refused".into()))
        }

        fn put_multi(
            &self,
            _info: &CacheInfo<'_>,
            _keys: &[Key],
            _entities: &[PropertyList],
        ) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".into()))
        }

        fn delete_multi(&self, _info: &CacheInfo<'_>, _keys: &[Key]) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".into()))
        }

        fn report_error(&self, _op: CacheOp, _error: &CacheError) {
            self.reported.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn entity(title: &str) -> PropertyList {
        PropertyList::new().with("title", title)
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    #[test]
    fn miss_populates_every_layer_in_order() {
        let driver = InMemoryDriver::new();
        let first = Arc::new(InMemoryCache::new().named("first"));
        let second = Arc::new(InMemoryCache::new().named("second"));
        let layers: Vec<Arc<dyn CacheLayer>> = vec![first.clone(), second.clone()];
        let bridge = CacheBridge::new(OriginalStoreBridge::new(&driver), &layers);
        let ctx = Context::background();
        let client = ClientInfo::new("proj");
        let info = CacheInfo::new(&ctx, &client);
        let key = Key::id("Task", 1);

        bridge.store().put_multi(&ctx, &[key.clone()], &[entity("a")]).unwrap();
        let mut dst = vec![PropertyList::new()];
        bridge.get_multi_without_tx(&info, &[key.clone()], &mut dst).unwrap();

        assert_eq!(dst[0], entity("a"));
        assert!(first.contains("proj", &key));
        assert!(second.contains("proj", &key));
    }

    #[test]
    fn deeper_hit_backfills_earlier_layers() {
        let driver = InMemoryDriver::new();
        let first = Arc::new(InMemoryCache::new().named("first"));
        let second = Arc::new(InMemoryCache::new().named("second"));
        let layers: Vec<Arc<dyn CacheLayer>> = vec![first.clone(), second.clone()];
        let bridge = CacheBridge::new(OriginalStoreBridge::new(&driver), &layers);
        let ctx = Context::background();
        let client = ClientInfo::new("proj");
        let info = CacheInfo::new(&ctx, &client);
        let key = Key::id("Task", 1);

        second.put_multi(&info, &[key.clone()], &[entity("cached")]).unwrap();
        let mut dst = vec![PropertyList::new()];
        bridge.get_multi_without_tx(&info, &[key.clone()], &mut dst).unwrap();

        assert_eq!(dst[0], entity("cached"));
        assert!(first.contains("proj", &key));
        assert_eq!(driver.stats().get_multi, 0);
    }

    #[test]
    fn broken_layer_is_reported_and_ignored() {
        let driver = InMemoryDriver::new();
        let broken = Arc::new(BrokenLayer {
            reported: AtomicU64::new(0),
        });
        let layers: Vec<Arc<dyn CacheLayer>> = vec![broken.clone()];
        let bridge = CacheBridge::new(OriginalStoreBridge::new(&driver), &layers);
        let ctx = Context::background();
        let client = ClientInfo::new("proj");
        let info = CacheInfo::new(&ctx, &client);
        let key = Key::id("Task", 1);

        bridge
            .put_multi_without_tx(&info, &[key.clone()], &[entity("a")])
            .unwrap();
        let mut dst = vec![PropertyList::new()];
        bridge.get_multi_without_tx(&info, &[key], &mut dst).unwrap();

        assert_eq!(dst[0], entity("a"));
        // put (invalidate), get, populate
        assert_eq!(broken.reported.load(Ordering::Relaxed), 3);
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn missing_transaction_is_unexpected_context() {
        let driver = InMemoryDriver::new();
        let layers: Vec<Arc<dyn CacheLayer>> = Vec::new();
        let bridge = CacheBridge::new(OriginalStoreBridge::new(&driver), &layers);
        let ctx = Context::background();
        let client = ClientInfo::new("proj");
        let info = CacheInfo::new(&ctx, &client);
        let key = Key::id("Task", 1);

        let mut dst = vec![PropertyList::new()];
        assert_eq!(
            bridge.get_multi_with_tx(&info, None, &[key.clone()], &mut dst),
            Err(DatastoreError::UnexpectedContext)
        );
        assert_eq!(
            bridge.put_multi_with_tx(&info, None, &[key.clone()], &[entity("a")]),
            Err(DatastoreError::UnexpectedContext)
        );
        assert_eq!(
            bridge.delete_multi_with_tx(&info, None, &[key]),
            Err(DatastoreError::UnexpectedContext)
        );
        assert_eq!(driver.stats().store_calls(), 0);
    }

    #[test]
    fn transactional_reads_skip_shared_layers() {
        let driver = InMemoryDriver::new();
        let shared = Arc::new(InMemoryCache::new());
        let local = Arc::new(InMemoryCache::local());
        let layers: Vec<Arc<dyn CacheLayer>> = vec![shared.clone(), local.clone()];
        let bridge = CacheBridge::new(OriginalStoreBridge::new(&driver), &layers);
        let ctx = Context::background();
        let client = ClientInfo::new("proj");
        let info = CacheInfo::new(&ctx, &client);
        let key = Key::id("Task", 1);

        bridge.store().put_multi(&ctx, &[key.clone()], &[entity("a")]).unwrap();
        let tx = driver.new_transaction(&ctx).unwrap();
        let tx_bridge = TransactionBridge::new(tx.as_ref());
        let mut dst = vec![PropertyList::new()];
        bridge
            .get_multi_with_tx(&info, Some(&tx_bridge), &[key.clone()], &mut dst)
            .unwrap();

        assert_eq!(dst[0], entity("a"));
        assert_eq!(shared.stats().misses, 0);
        assert!(!shared.contains("proj", &key));
        assert!(local.contains("proj", &key));
        tx.rollback().unwrap();
    }

    #[test]
    fn transactional_reads_always_reach_the_transaction() {
        let driver = InMemoryDriver::new();
        let local = Arc::new(InMemoryCache::local());
        let layers: Vec<Arc<dyn CacheLayer>> = vec![local.clone()];
        let bridge = CacheBridge::new(OriginalStoreBridge::new(&driver), &layers);
        let ctx = Context::background();
        let client = ClientInfo::new("proj");
        let info = CacheInfo::new(&ctx, &client);
        let key = Key::id("Task", 1);

        bridge.store().put_multi(&ctx, &[key.clone()], &[entity("stored")]).unwrap();
        local.put_multi(&info, &[key.clone()], &[entity("stale")]).unwrap();

        let tx = driver.new_transaction(&ctx).unwrap();
        let tx_bridge = TransactionBridge::new(tx.as_ref());
        let mut dst = vec![PropertyList::new()];
        bridge
            .get_multi_with_tx(&info, Some(&tx_bridge), &[key.clone()], &mut dst)
            .unwrap();

        assert_eq!(dst[0], entity("stored"));
        assert_eq!(driver.stats().tx_get_multi, 1);
        assert_eq!(local.stats().hits, 0);
        let cached = local.get_multi(&info, &[key]).unwrap();
        assert_eq!(cached[0], Some(entity("stored")));
        tx.rollback().unwrap();
    }
}

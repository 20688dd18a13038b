use dsb_driver::{DriverClient, DriverPropertyList, DriverResult};
use dsb_types::{Context, DatastoreError, DatastoreResult, Key, MultiError, PropertyList, Query};
use tracing::debug;

use crate::bridge::iterator::QueryIterator;
use crate::normalize::{normalize, normalize_batch};
use crate::translate::{
    to_driver_keys, to_driver_property_lists, to_driver_query, to_portable_keys,
    to_portable_properties,
};

/// Reject parallel slices of different lengths before any backend call.
pub(crate) fn check_lengths(keys: usize, values: usize) -> DatastoreResult<()> {
    if keys != values {
        return Err(DatastoreError::LengthMismatch { keys, values });
    }
    Ok(())
}

/// Copy the slots a driver loaded successfully into `dst`.
///
/// Slots the driver reported as failed are left untouched. A slot whose
/// entity cannot be translated becomes a per-slot error.
pub(crate) fn load_slots(
    result: DriverResult<()>,
    loaded: Vec<DriverPropertyList>,
    dst: &mut [PropertyList],
) -> DatastoreResult<()> {
    let mut multi = match result {
        Ok(()) => MultiError::new(dst.len()),
        Err(err) => match normalize_batch(err, dst.len()) {
            DatastoreError::Multi(multi) => multi,
            other => return Err(other),
        },
    };
    for (i, (slot, props)) in dst.iter_mut().zip(loaded).enumerate() {
        if multi.get(i).is_some() {
            continue;
        }
        match to_portable_properties(props) {
            Ok(list) => *slot = list,
            Err(err) => multi.set(i, err),
        }
    }
    multi.into_result()
}

/// Non-transactional store access in portable types.
///
/// Every call validates and translates its input, makes exactly one driver
/// call, and normalizes the result. Caches are not involved here.
#[derive(Clone, Copy)]
pub struct OriginalStoreBridge<'a> {
    driver: &'a dyn DriverClient,
}

impl<'a> OriginalStoreBridge<'a> {
    pub fn new(driver: &'a dyn DriverClient) -> Self {
        Self { driver }
    }

    /// Write `entities`, returning the stored keys (incomplete keys come back
    /// with allocated IDs).
    pub fn put_multi(
        &self,
        ctx: &Context,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> DatastoreResult<Vec<Key>> {
        check_lengths(keys.len(), entities.len())?;
        let driver_keys = to_driver_keys(keys)?;
        let driver_entities = to_driver_property_lists(entities)?;
        let stored = self
            .driver
            .put_multi(ctx, &driver_keys, &driver_entities)
            .map_err(|e| normalize_batch(e, keys.len()))?;
        debug!(count = stored.len(), "store put");
        Ok(to_portable_keys(stored))
    }

    /// Load entities for `keys` into `dst`. On a batch error, successful
    /// slots are still filled.
    pub fn get_multi(
        &self,
        ctx: &Context,
        keys: &[Key],
        dst: &mut [PropertyList],
    ) -> DatastoreResult<()> {
        check_lengths(keys.len(), dst.len())?;
        let driver_keys = to_driver_keys(keys)?;
        let mut loaded = vec![DriverPropertyList::new(); keys.len()];
        let result = self.driver.get_multi(ctx, &driver_keys, &mut loaded);
        debug!(count = keys.len(), ok = result.is_ok(), "store get");
        load_slots(result, loaded, dst)
    }

    pub fn delete_multi(&self, ctx: &Context, keys: &[Key]) -> DatastoreResult<()> {
        let driver_keys = to_driver_keys(keys)?;
        self.driver
            .delete_multi(ctx, &driver_keys)
            .map_err(|e| normalize_batch(e, keys.len()))?;
        debug!(count = keys.len(), "store delete");
        Ok(())
    }

    /// Start a query. A malformed query yields an iterator that fails on its
    /// first call without starting a driver cursor.
    pub fn run(&self, ctx: &Context, query: &Query) -> QueryIterator {
        match to_driver_query(query) {
            Ok(driver_query) => QueryIterator::new(self.driver.run(ctx, &driver_query)),
            Err(err) => QueryIterator::failed(err),
        }
    }

    /// Run `query` to completion, appending entities to `dst`.
    pub fn get_all(
        &self,
        ctx: &Context,
        query: &Query,
        dst: &mut Vec<PropertyList>,
    ) -> DatastoreResult<Vec<Key>> {
        let driver_query = to_driver_query(query)?;
        let mut loaded = Vec::new();
        let keys = self
            .driver
            .get_all(ctx, &driver_query, &mut loaded)
            .map_err(normalize)?;
        for props in loaded {
            dst.push(to_portable_properties(props)?);
        }
        Ok(to_portable_keys(keys))
    }

    pub fn count(&self, ctx: &Context, query: &Query) -> DatastoreResult<usize> {
        let driver_query = to_driver_query(query)?;
        self.driver.count(ctx, &driver_query).map_err(normalize)
    }

    /// Reserve IDs for incomplete `keys`.
    pub fn allocate_ids(&self, ctx: &Context, keys: &[Key]) -> DatastoreResult<Vec<Key>> {
        let driver_keys = to_driver_keys(keys)?;
        let allocated = self
            .driver
            .allocate_ids(ctx, &driver_keys)
            .map_err(|e| normalize_batch(e, keys.len()))?;
        Ok(to_portable_keys(allocated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsb_driver::{DriverError, DriverKey, InMemoryDriver};

    fn entity(title: &str) -> PropertyList {
        PropertyList::new().with("title", title)
    }

    #[test]
    fn length_mismatch_makes_no_driver_call() {
        let driver = InMemoryDriver::new();
        let bridge = OriginalStoreBridge::new(&driver);
        let ctx = Context::background();
        let err = bridge
            .put_multi(&ctx, &[Key::id("Task", 1), Key::id("Task", 2)], &[entity("a")])
            .unwrap_err();
        assert_eq!(err, DatastoreError::LengthMismatch { keys: 2, values: 1 });
        assert_eq!(driver.stats().store_calls(), 0);
    }

    #[test]
    fn put_allocates_incomplete_keys() {
        let driver = InMemoryDriver::new();
        let bridge = OriginalStoreBridge::new(&driver);
        let ctx = Context::background();
        let keys = bridge
            .put_multi(&ctx, &[Key::incomplete("Task")], &[entity("a")])
            .unwrap();
        assert!(!keys[0].is_incomplete());
        assert_eq!(keys[0].kind(), "Task");
    }

    #[test]
    fn get_fills_successful_slots_on_partial_failure() {
        let driver = InMemoryDriver::new();
        let bridge = OriginalStoreBridge::new(&driver);
        let ctx = Context::background();
        let present = Key::id("Task", 1);
        bridge.put_multi(&ctx, &[present.clone()], &[entity("a")]).unwrap();

        let mut dst = vec![PropertyList::new(); 2];
        let err = bridge
            .get_multi(&ctx, &[present, Key::id("Task", 2)], &mut dst)
            .unwrap_err();
        let DatastoreError::Multi(multi) = err else {
            panic!("expected a batch error");
        };
        assert!(multi.get(0).is_none());
        assert_eq!(multi.get(1), Some(&DatastoreError::NoSuchEntity));
        assert_eq!(dst[0], entity("a"));
        assert!(dst[1].is_empty());
    }

    #[test]
    fn injected_fault_is_normalized() {
        let driver = InMemoryDriver::new();
        driver.inject_fault(
            DriverKey {
                kind: "Task".into(),
                id: 1,
                ..DriverKey::default()
            },
            DriverError::EntityExists,
        );
        let bridge = OriginalStoreBridge::new(&driver);
        let ctx = Context::background();
        let err = bridge
            .put_multi(&ctx, &[Key::id("Task", 1)], &[entity("a")])
            .unwrap_err();
        assert_eq!(err.into_single(), DatastoreError::EntityExists);
    }

    #[test]
    fn malformed_query_never_reaches_driver() {
        let driver = InMemoryDriver::new();
        let bridge = OriginalStoreBridge::new(&driver);
        let ctx = Context::background();
        let query = Query::new("Task").filter("title ~", "x");
        assert!(bridge.count(&ctx, &query).is_err());
        let mut it = bridge.run(&ctx, &query);
        assert!(matches!(
            it.next(&mut PropertyList::new()),
            Err(DatastoreError::InvalidArgument(_))
        ));
        assert_eq!(driver.stats().run, 0);
        assert_eq!(driver.stats().count, 0);
    }
}

use dsb_driver::{DriverPropertyList, DriverTransaction};
use dsb_types::{DatastoreResult, Key, PendingKey, PropertyList};
use tracing::debug;

use crate::bridge::original::{check_lengths, load_slots};
use crate::normalize::normalize_batch;
use crate::translate::{to_driver_keys, to_driver_property_lists, to_portable_pending_keys};

/// Transactional store access in portable types.
///
/// Wraps one open driver transaction. Puts return [`PendingKey`]s that only
/// resolve to final keys once the transaction commits.
#[derive(Clone, Copy)]
pub struct TransactionBridge<'a> {
    tx: &'a dyn DriverTransaction,
}

impl<'a> TransactionBridge<'a> {
    pub fn new(tx: &'a dyn DriverTransaction) -> Self {
        Self { tx }
    }

    /// Identifier of the underlying driver transaction.
    pub fn id(&self) -> &str {
        self.tx.id()
    }

    pub fn put_multi(
        &self,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> DatastoreResult<Vec<PendingKey>> {
        check_lengths(keys.len(), entities.len())?;
        let driver_keys = to_driver_keys(keys)?;
        let driver_entities = to_driver_property_lists(entities)?;
        let pending = self
            .tx
            .put_multi(&driver_keys, &driver_entities)
            .map_err(|e| normalize_batch(e, keys.len()))?;
        debug!(transaction = self.id(), count = pending.len(), "transaction put");
        Ok(to_portable_pending_keys(pending))
    }

    /// Load entities for `keys` into `dst`; successful slots are filled even
    /// when others fail.
    pub fn get_multi(&self, keys: &[Key], dst: &mut [PropertyList]) -> DatastoreResult<()> {
        check_lengths(keys.len(), dst.len())?;
        let driver_keys = to_driver_keys(keys)?;
        let mut loaded = vec![DriverPropertyList::new(); keys.len()];
        let result = self.tx.get_multi(&driver_keys, &mut loaded);
        load_slots(result, loaded, dst)
    }

    pub fn delete_multi(&self, keys: &[Key]) -> DatastoreResult<()> {
        let driver_keys = to_driver_keys(keys)?;
        self.tx
            .delete_multi(&driver_keys)
            .map_err(|e| normalize_batch(e, keys.len()))?;
        debug!(transaction = self.id(), count = keys.len(), "transaction delete");
        Ok(())
    }
}

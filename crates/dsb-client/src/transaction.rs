use std::collections::HashSet;
use std::slice;

use dsb_cache::CacheInfo;
use dsb_driver::{DriverCommit, DriverTransaction};
use dsb_types::{Context, DatastoreError, DatastoreResult, Key, PendingKey, PropertyList};
use tracing::{debug, warn};

use crate::batch::TransactionBatch;
use crate::bridge::TransactionBridge;
use crate::client::Client;
use crate::normalize::normalize;
use crate::translate::{to_driver_pending_key, to_portable_key};

/// An open transaction.
///
/// Reads see the store, not the transaction's own buffered writes. Writes
/// become visible atomically on [`Transaction::commit`]. Both `commit` and
/// `rollback` consume the handle, so a finished transaction cannot be used
/// again:
///
/// ```compile_fail
/// use dsb_client::{Client, ClientConfig, Context, InMemoryDriver};
///
/// let client = Client::new(InMemoryDriver::new(), ClientConfig::new("proj"));
/// let ctx = Context::background();
/// let tx = client.new_transaction(&ctx).unwrap();
/// tx.commit().unwrap();
/// tx.commit().unwrap();
/// ```
///
/// A transaction dropped without either call is rolled back.
pub struct Transaction {
    client: Client,
    ctx: Context,
    id: String,
    inner: Option<Box<dyn DriverTransaction>>,
    /// Complete keys written or deleted, invalidated in every layer on commit.
    touched: Vec<Key>,
}

impl Transaction {
    pub(crate) fn begin(client: Client, ctx: &Context) -> DatastoreResult<Self> {
        let inner = client.driver.new_transaction(ctx).map_err(normalize)?;
        let id = inner.id().to_string();
        debug!(transaction = %id, "transaction started");
        Ok(Self {
            client,
            ctx: ctx.clone(),
            id,
            inner: Some(inner),
            touched: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    fn bridge(&self) -> Option<TransactionBridge<'_>> {
        self.inner.as_deref().map(|tx| TransactionBridge::new(tx))
    }

    fn info(&self) -> CacheInfo<'_> {
        CacheInfo::new(&self.ctx, &self.client.info)
    }

    // ---- Reads ----

    pub fn get(&self, key: &Key) -> DatastoreResult<PropertyList> {
        let mut dst = [PropertyList::new()];
        self.get_multi(slice::from_ref(key), &mut dst)
            .map_err(DatastoreError::into_single)?;
        let [entity] = dst;
        Ok(entity)
    }

    pub fn get_multi(&self, keys: &[Key], dst: &mut [PropertyList]) -> DatastoreResult<()> {
        let bridge = self.bridge();
        self.client
            .cache_bridge()
            .get_multi_with_tx(&self.info(), bridge.as_ref(), keys, dst)
    }

    // ---- Writes ----

    /// Buffer a write; the returned key resolves through [`Commit::key`].
    pub fn put(&mut self, key: &Key, entity: &PropertyList) -> DatastoreResult<PendingKey> {
        let mut pending = self
            .put_multi(slice::from_ref(key), slice::from_ref(entity))
            .map_err(DatastoreError::into_single)?;
        pending
            .pop()
            .ok_or_else(|| DatastoreError::Unknown("transaction returned no pending key".into()))
    }

    pub fn put_multi(
        &mut self,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> DatastoreResult<Vec<PendingKey>> {
        let pending = {
            let bridge = self.bridge();
            self.client
                .cache_bridge()
                .put_multi_with_tx(&self.info(), bridge.as_ref(), keys, entities)?
        };
        self.touch(keys);
        Ok(pending)
    }

    pub fn delete(&mut self, key: &Key) -> DatastoreResult<()> {
        self.delete_multi(slice::from_ref(key))
            .map_err(DatastoreError::into_single)
    }

    pub fn delete_multi(&mut self, keys: &[Key]) -> DatastoreResult<()> {
        {
            let bridge = self.bridge();
            self.client
                .cache_bridge()
                .delete_multi_with_tx(&self.info(), bridge.as_ref(), keys)?;
        }
        self.touch(keys);
        Ok(())
    }

    /// Queue operations to run together inside this transaction.
    pub fn batch(&mut self) -> TransactionBatch<'_> {
        TransactionBatch::new(self)
    }

    fn touch(&mut self, keys: &[Key]) {
        self.touched
            .extend(keys.iter().filter(|k| !k.is_incomplete()).cloned());
    }

    // ---- Completion ----

    /// Apply every buffered write atomically.
    ///
    /// Fails with [`DatastoreError::ConcurrentTransaction`] if data the
    /// transaction read changed since. On success, every cache layer is
    /// invalidated for the keys the transaction wrote or deleted.
    pub fn commit(mut self) -> DatastoreResult<Commit> {
        let inner = self.inner.take().ok_or(DatastoreError::UnexpectedContext)?;
        let committed = inner.commit().map_err(normalize)?;

        let mut keys = std::mem::take(&mut self.touched);
        keys.extend(committed.keys.values().cloned().map(to_portable_key));
        keys.sort();
        keys.dedup();
        self.client.cache_bridge().invalidate_all(&self.info(), &keys);

        debug!(transaction = %self.id, keys = keys.len(), "transaction committed");
        Ok(Commit::new(committed))
    }

    /// Discard every buffered write.
    pub fn rollback(mut self) -> DatastoreResult<()> {
        let inner = self.inner.take().ok_or(DatastoreError::UnexpectedContext)?;
        inner.rollback().map_err(normalize)?;
        debug!(transaction = %self.id, "transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            warn!(transaction = %self.id, "transaction dropped while open; rolling back");
            if let Err(err) = inner.rollback() {
                warn!(transaction = %self.id, error = %normalize(err), "rollback failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("open", &self.inner.is_some())
            .field("touched", &self.touched.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// The outcome of a committed transaction.
///
/// Resolves the [`PendingKey`]s handed out by the transaction's puts. Each
/// pending key resolves once.
#[derive(Debug)]
pub struct Commit {
    inner: DriverCommit,
    resolved: HashSet<u64>,
}

impl Commit {
    fn new(inner: DriverCommit) -> Self {
        Self {
            inner,
            resolved: HashSet::new(),
        }
    }

    /// Identifier of the committed transaction.
    pub fn transaction(&self) -> &str {
        &self.inner.transaction
    }

    /// The final key for `pending`.
    ///
    /// Fails with [`DatastoreError::InvalidArgument`] for a pending key from
    /// another transaction, an unknown slot, or a slot already resolved.
    pub fn key(&mut self, pending: PendingKey) -> DatastoreResult<Key> {
        if pending.transaction() != self.inner.transaction {
            return Err(DatastoreError::InvalidArgument(format!(
                "pending key belongs to transaction {}, not {}",
                pending.transaction(),
                self.inner.transaction
            )));
        }
        let key = self
            .inner
            .key(&to_driver_pending_key(&pending))
            .ok_or_else(|| {
                DatastoreError::InvalidArgument(format!("unknown pending key slot {}", pending.slot()))
            })?;
        if !self.resolved.insert(pending.slot()) {
            return Err(DatastoreError::InvalidArgument(format!(
                "pending key slot {} already resolved",
                pending.slot()
            )));
        }
        Ok(to_portable_key(key))
    }

    /// Resolve several pending keys, in order.
    pub fn keys(
        &mut self,
        pending: impl IntoIterator<Item = PendingKey>,
    ) -> DatastoreResult<Vec<Key>> {
        pending.into_iter().map(|p| self.key(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use dsb_driver::InMemoryDriver;

    fn client() -> (Client, InMemoryDriver) {
        let driver = InMemoryDriver::new();
        (Client::new(driver.clone(), ClientConfig::new("proj")), driver)
    }

    #[test]
    fn commit_resolves_pending_keys_once() {
        let (client, driver) = client();
        let ctx = Context::background();
        let mut tx = client.new_transaction(&ctx).unwrap();
        let pending = tx
            .put(&Key::incomplete("Task"), &PropertyList::new().with("n", 1i64))
            .unwrap();
        let mut commit = tx.commit().unwrap();

        let key = commit.key(pending.clone()).unwrap();
        assert!(!key.is_incomplete());
        assert_eq!(driver.len(), 1);
        assert!(matches!(
            commit.key(pending),
            Err(DatastoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn foreign_pending_key_is_rejected() {
        let (client, _) = client();
        let ctx = Context::background();
        let mut commit = client.new_transaction(&ctx).unwrap().commit().unwrap();
        let err = commit.key(PendingKey::new("someone-else", 0)).unwrap_err();
        assert!(matches!(err, DatastoreError::InvalidArgument(_)));
    }

    #[test]
    fn rollback_discards_writes() {
        let (client, driver) = client();
        let ctx = Context::background();
        let mut tx = client.new_transaction(&ctx).unwrap();
        tx.put(&Key::id("Task", 1), &PropertyList::new()).unwrap();
        tx.rollback().unwrap();
        assert!(driver.is_empty());
        assert_eq!(driver.stats().rollbacks, 1);
    }

    #[test]
    fn drop_rolls_back() {
        let (client, driver) = client();
        let ctx = Context::background();
        {
            let mut tx = client.new_transaction(&ctx).unwrap();
            tx.put(&Key::id("Task", 1), &PropertyList::new()).unwrap();
        }
        assert!(driver.is_empty());
        assert_eq!(driver.stats().rollbacks, 1);
        assert_eq!(driver.stats().commits, 0);
    }

    #[test]
    fn reads_do_not_see_buffered_writes() {
        let (client, _) = client();
        let ctx = Context::background();
        let key = Key::id("Task", 1);
        let mut tx = client.new_transaction(&ctx).unwrap();
        tx.put(&key, &PropertyList::new()).unwrap();
        assert!(tx.get(&key).unwrap_err().is_not_found());
        tx.rollback().unwrap();
    }
}

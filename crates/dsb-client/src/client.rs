use std::slice;
use std::sync::Arc;

use dsb_cache::{CacheInfo, CacheLayer, ClientInfo};
use dsb_driver::DriverClient;
use dsb_types::{Context, DatastoreError, DatastoreResult, Key, PropertyList, Query};
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::bridge::{CacheBridge, OriginalStoreBridge, QueryIterator};
use crate::config::ClientConfig;
use crate::transaction::{Commit, Transaction};

/// Entry point for application code.
///
/// Owns a driver and an ordered list of cache layers. Entity reads and writes
/// go through the cache pipeline; queries, counts and ID allocation go
/// straight to the store. Clones share the driver and the layers.
#[derive(Clone)]
pub struct Client {
    pub(crate) driver: Arc<dyn DriverClient>,
    pub(crate) layers: Vec<Arc<dyn CacheLayer>>,
    pub(crate) config: ClientConfig,
    pub(crate) info: ClientInfo,
}

impl Client {
    pub fn new(driver: impl DriverClient + 'static, config: ClientConfig) -> Self {
        Self::from_arc(Arc::new(driver), config)
    }

    pub fn from_arc(driver: Arc<dyn DriverClient>, config: ClientConfig) -> Self {
        let info = ClientInfo {
            project_id: config.project_id.clone(),
            namespace: config.namespace.clone(),
        };
        debug!(project = %info.project_id, "datastore client created");
        Self {
            driver,
            layers: Vec::new(),
            config,
            info,
        }
    }

    /// Append a cache layer; layers are consulted in the order added.
    pub fn add_cache(&mut self, layer: Arc<dyn CacheLayer>) {
        debug!(layer = layer.name(), position = self.layers.len(), "cache layer added");
        self.layers.push(layer);
    }

    pub fn with_cache(mut self, layer: Arc<dyn CacheLayer>) -> Self {
        self.add_cache(layer);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.info
    }

    pub fn cache_layers(&self) -> &[Arc<dyn CacheLayer>] {
        &self.layers
    }

    pub(crate) fn cache_bridge(&self) -> CacheBridge<'_> {
        let layers: &[Arc<dyn CacheLayer>] = if self.config.cache_enabled {
            &self.layers
        } else {
            &[]
        };
        CacheBridge::new(self.store(), layers)
    }

    fn store(&self) -> OriginalStoreBridge<'_> {
        OriginalStoreBridge::new(self.driver.as_ref())
    }

    // ---- Keys ----

    /// A key with a string name in the client's namespace.
    pub fn name_key(&self, kind: &str, name: &str) -> Key {
        self.in_namespace(Key::name(kind, name))
    }

    /// A key with a numeric ID in the client's namespace.
    pub fn id_key(&self, kind: &str, id: i64) -> Key {
        self.in_namespace(Key::id(kind, id))
    }

    /// An incomplete key in the client's namespace; the store assigns its ID.
    pub fn incomplete_key(&self, kind: &str) -> Key {
        self.in_namespace(Key::incomplete(kind))
    }

    fn in_namespace(&self, key: Key) -> Key {
        match &self.config.namespace {
            Some(namespace) => key.with_namespace(namespace.clone()),
            None => key,
        }
    }

    // ---- Single-entity operations ----

    pub fn get(&self, ctx: &Context, key: &Key) -> DatastoreResult<PropertyList> {
        let mut dst = [PropertyList::new()];
        self.get_multi(ctx, slice::from_ref(key), &mut dst)
            .map_err(DatastoreError::into_single)?;
        let [entity] = dst;
        Ok(entity)
    }

    /// Store `entity` and return its complete key.
    pub fn put(&self, ctx: &Context, key: &Key, entity: &PropertyList) -> DatastoreResult<Key> {
        let mut keys = self
            .put_multi(ctx, slice::from_ref(key), slice::from_ref(entity))
            .map_err(DatastoreError::into_single)?;
        keys.pop()
            .ok_or_else(|| DatastoreError::Unknown("store returned no key".into()))
    }

    pub fn delete(&self, ctx: &Context, key: &Key) -> DatastoreResult<()> {
        self.delete_multi(ctx, slice::from_ref(key))
            .map_err(DatastoreError::into_single)
    }

    // ---- Batch operations ----

    /// Load entities for `keys` into `dst` (same length).
    ///
    /// Per-key failures come back as [`DatastoreError::Multi`]; slots that
    /// succeeded are filled regardless.
    pub fn get_multi(
        &self,
        ctx: &Context,
        keys: &[Key],
        dst: &mut [PropertyList],
    ) -> DatastoreResult<()> {
        let info = CacheInfo::new(ctx, &self.info);
        self.cache_bridge().get_multi_without_tx(&info, keys, dst)
    }

    pub fn put_multi(
        &self,
        ctx: &Context,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> DatastoreResult<Vec<Key>> {
        let info = CacheInfo::new(ctx, &self.info);
        self.cache_bridge().put_multi_without_tx(&info, keys, entities)
    }

    pub fn delete_multi(&self, ctx: &Context, keys: &[Key]) -> DatastoreResult<()> {
        let info = CacheInfo::new(ctx, &self.info);
        self.cache_bridge().delete_multi_without_tx(&info, keys)
    }

    /// Start a batch whose operations run on [`Batch::exec`].
    pub fn batch<'a>(&'a self, ctx: &'a Context) -> Batch<'a> {
        Batch::new(self, ctx)
    }

    // ---- Queries ----

    pub fn run(&self, ctx: &Context, query: &Query) -> QueryIterator {
        self.store().run(ctx, query)
    }

    /// Run `query` to completion, appending entities to `dst` and returning
    /// their keys.
    pub fn get_all(
        &self,
        ctx: &Context,
        query: &Query,
        dst: &mut Vec<PropertyList>,
    ) -> DatastoreResult<Vec<Key>> {
        self.store().get_all(ctx, query, dst)
    }

    pub fn count(&self, ctx: &Context, query: &Query) -> DatastoreResult<usize> {
        self.store().count(ctx, query)
    }

    pub fn allocate_ids(&self, ctx: &Context, keys: &[Key]) -> DatastoreResult<Vec<Key>> {
        self.store().allocate_ids(ctx, keys)
    }

    // ---- Transactions ----

    pub fn new_transaction(&self, ctx: &Context) -> DatastoreResult<Transaction> {
        Transaction::begin(self.clone(), ctx)
    }

    /// Run `f` in a transaction and commit it, retrying on commit conflicts
    /// up to `max_transaction_attempts` times.
    ///
    /// An error from `f` rolls the transaction back and is returned as-is.
    pub fn run_in_transaction<T, F>(&self, ctx: &Context, mut f: F) -> DatastoreResult<(T, Commit)>
    where
        F: FnMut(&mut Transaction) -> DatastoreResult<T>,
    {
        let attempts = self.config.max_transaction_attempts.max(1);
        for attempt in 1..=attempts {
            let mut tx = self.new_transaction(ctx)?;
            let value = match f(&mut tx) {
                Ok(value) => value,
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback() {
                        warn!(error = %rollback_err, "rollback after failed transaction body");
                    }
                    return Err(err);
                }
            };
            match tx.commit() {
                Ok(commit) => return Ok((value, commit)),
                Err(DatastoreError::ConcurrentTransaction) if attempt < attempts => {
                    debug!(attempt, attempts, "transaction conflicted; retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(DatastoreError::ConcurrentTransaction)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layers: Vec<&str> = self.layers.iter().map(|l| l.name()).collect();
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("layers", &layers)
            .finish()
    }
}

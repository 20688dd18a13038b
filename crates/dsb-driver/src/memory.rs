use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dsb_types::{Context, DatastoreError};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DriverError, DriverResult};
use crate::eval;
use crate::traits::{DriverClient, DriverIterator, DriverTransaction};
use crate::types::{
    DriverCommit, DriverKey, DriverPendingKey, DriverPropertyList, DriverQuery,
};

/// Snapshot of per-operation call counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub get_multi: u64,
    pub put_multi: u64,
    pub delete_multi: u64,
    pub run: u64,
    pub get_all: u64,
    pub count: u64,
    pub allocate_ids: u64,
    pub transactions: u64,
    pub tx_get_multi: u64,
    pub tx_put_multi: u64,
    pub tx_delete_multi: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

impl DriverStats {
    /// Total calls that reached the store, transactional or not.
    pub fn store_calls(&self) -> u64 {
        self.get_multi
            + self.put_multi
            + self.delete_multi
            + self.run
            + self.get_all
            + self.count
            + self.allocate_ids
            + self.tx_get_multi
            + self.tx_put_multi
            + self.tx_delete_multi
            + self.commits
    }
}

#[derive(Default)]
struct Counters {
    get_multi: AtomicU64,
    put_multi: AtomicU64,
    delete_multi: AtomicU64,
    run: AtomicU64,
    get_all: AtomicU64,
    count: AtomicU64,
    allocate_ids: AtomicU64,
    transactions: AtomicU64,
    tx_get_multi: AtomicU64,
    tx_put_multi: AtomicU64,
    tx_delete_multi: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self) -> DriverStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DriverStats {
            get_multi: load(&self.get_multi),
            put_multi: load(&self.put_multi),
            delete_multi: load(&self.delete_multi),
            run: load(&self.run),
            get_all: load(&self.get_all),
            count: load(&self.count),
            allocate_ids: load(&self.allocate_ids),
            transactions: load(&self.transactions),
            tx_get_multi: load(&self.tx_get_multi),
            tx_put_multi: load(&self.tx_put_multi),
            tx_delete_multi: load(&self.tx_delete_multi),
            commits: load(&self.commits),
            rollbacks: load(&self.rollbacks),
        }
    }
}

struct Record {
    properties: DriverPropertyList,
    version: u64,
}

struct Shared {
    entities: RwLock<BTreeMap<DriverKey, Record>>,
    next_id: AtomicI64,
    clock: AtomicU64,
    faults: Mutex<HashMap<DriverKey, DriverError>>,
    next_call_failure: Mutex<Option<DriverError>>,
    counters: Counters,
}

impl Shared {
    fn check_ctx(ctx: &Context) -> DriverResult<()> {
        match ctx.err() {
            None => Ok(()),
            Some(DatastoreError::DeadlineExceeded) => Err(DriverError::DeadlineExceeded),
            Some(_) => Err(DriverError::Cancelled),
        }
    }

    fn take_call_failure(&self) -> DriverResult<()> {
        match self.next_call_failure.lock().expect("lock poisoned").take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fault_for(&self, key: &DriverKey) -> Option<DriverError> {
        self.faults.lock().expect("lock poisoned").get(key).cloned()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn allocate(&self, key: &DriverKey) -> DriverKey {
        DriverKey {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            ..key.clone()
        }
    }

    /// Entry checks shared by every call: context, injected call failure,
    /// and batch alignment.
    fn begin_call(&self, ctx: &Context, keys: usize, values: Option<usize>) -> DriverResult<()> {
        Self::check_ctx(ctx)?;
        self.take_call_failure()?;
        match values {
            Some(values) if values != keys => Err(DriverError::InvalidArgument(format!(
                "{keys} keys but {values} entities"
            ))),
            _ => Ok(()),
        }
    }

    /// Per-slot validation and injected faults, in batch order.
    fn slot_errors(&self, keys: &[DriverKey], allow_incomplete: bool) -> Vec<Option<DriverError>> {
        keys.iter()
            .map(|key| match validate_key(key, allow_incomplete) {
                Err(err) => Some(err),
                Ok(()) => self.fault_for(key),
            })
            .collect()
    }

    fn collect_matches(&self, query: &DriverQuery) -> Vec<(DriverKey, DriverPropertyList)> {
        let map = self.entities.read().expect("lock poisoned");
        let mut results: Vec<(DriverKey, DriverPropertyList)> = map
            .iter()
            .filter(|(key, record)| eval::matches(query, key, &record.properties))
            .map(|(key, record)| (key.clone(), record.properties.clone()))
            .collect();
        eval::sort(query, &mut results);
        let mut results = eval::page(query, results);
        if query.keys_only {
            for (_, props) in &mut results {
                props.clear();
            }
        }
        results
    }
}

fn validate_key(key: &DriverKey, allow_incomplete: bool) -> DriverResult<()> {
    if key.kind.is_empty() {
        return Err(DriverError::InvalidArgument("empty kind".into()));
    }
    if key.id < 0 {
        return Err(DriverError::InvalidArgument(format!("negative id {}", key.id)));
    }
    if key.id != 0 && !key.name.is_empty() {
        return Err(DriverError::InvalidArgument("key has both id and name".into()));
    }
    if key.is_incomplete() && !allow_incomplete {
        return Err(DriverError::InvalidArgument("incomplete key".into()));
    }
    if let Some(parent) = &key.parent {
        validate_key(parent, false)?;
    }
    Ok(())
}

fn into_batch_result<T>(value: T, errors: Vec<Option<DriverError>>) -> DriverResult<T> {
    if errors.iter().any(Option::is_some) {
        Err(DriverError::Multi(errors))
    } else {
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// InMemoryDriver
// ---------------------------------------------------------------------------

/// In-memory document store implementing the full driver contract.
///
/// Intended for tests and embedding. Entities live in an ordered map behind a
/// `RwLock`; clones share the same store. Transactions are optimistic: a
/// commit fails with [`DriverError::Concurrent`] if any entity the
/// transaction read has changed since.
///
/// Every call is counted (see [`InMemoryDriver::stats`]) and faults can be
/// injected per key or for the next call.
#[derive(Clone)]
pub struct InMemoryDriver {
    shared: Arc<Shared>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                entities: RwLock::new(BTreeMap::new()),
                next_id: AtomicI64::new(1),
                clock: AtomicU64::new(0),
                faults: Mutex::new(HashMap::new()),
                next_call_failure: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.shared.entities.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call counts so far.
    pub fn stats(&self) -> DriverStats {
        self.shared.counters.snapshot()
    }

    /// Fail every slot addressing `key` with `err` until cleared.
    pub fn inject_fault(&self, key: DriverKey, err: DriverError) {
        self.shared
            .faults
            .lock()
            .expect("lock poisoned")
            .insert(key, err);
    }

    pub fn clear_faults(&self) {
        self.shared.faults.lock().expect("lock poisoned").clear();
    }

    /// Fail the next store call as a whole with `err`.
    pub fn fail_next_call(&self, err: DriverError) {
        *self.shared.next_call_failure.lock().expect("lock poisoned") = Some(err);
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDriver")
            .field("entity_count", &self.len())
            .finish()
    }
}

impl DriverClient for InMemoryDriver {
    fn put_multi(
        &self,
        ctx: &Context,
        keys: &[DriverKey],
        entities: &[DriverPropertyList],
    ) -> DriverResult<Vec<DriverKey>> {
        let shared = &self.shared;
        bump(&shared.counters.put_multi);
        shared.begin_call(ctx, keys.len(), Some(entities.len()))?;

        let errors = shared.slot_errors(keys, true);
        let mut map = shared.entities.write().expect("lock poisoned");
        let mut stored = Vec::with_capacity(keys.len());
        for ((key, properties), error) in keys.iter().zip(entities).zip(&errors) {
            if error.is_some() {
                stored.push(key.clone());
                continue;
            }
            let key = if key.is_incomplete() {
                shared.allocate(key)
            } else {
                key.clone()
            };
            let record = Record {
                properties: properties.clone(),
                version: shared.tick(),
            };
            map.insert(key.clone(), record);
            stored.push(key);
        }
        into_batch_result(stored, errors)
    }

    fn get_multi(
        &self,
        ctx: &Context,
        keys: &[DriverKey],
        dst: &mut [DriverPropertyList],
    ) -> DriverResult<()> {
        let shared = &self.shared;
        bump(&shared.counters.get_multi);
        shared.begin_call(ctx, keys.len(), Some(dst.len()))?;

        let mut errors = shared.slot_errors(keys, false);
        let map = shared.entities.read().expect("lock poisoned");
        for (i, key) in keys.iter().enumerate() {
            if errors[i].is_some() {
                continue;
            }
            match map.get(key) {
                Some(record) => dst[i] = record.properties.clone(),
                None => errors[i] = Some(DriverError::NoSuchEntity),
            }
        }
        into_batch_result((), errors)
    }

    fn delete_multi(&self, ctx: &Context, keys: &[DriverKey]) -> DriverResult<()> {
        let shared = &self.shared;
        bump(&shared.counters.delete_multi);
        shared.begin_call(ctx, keys.len(), None)?;

        let errors = shared.slot_errors(keys, false);
        let mut map = shared.entities.write().expect("lock poisoned");
        for (key, error) in keys.iter().zip(&errors) {
            if error.is_none() {
                map.remove(key);
            }
        }
        into_batch_result((), errors)
    }

    fn run(&self, ctx: &Context, query: &DriverQuery) -> Box<dyn DriverIterator> {
        let shared = &self.shared;
        bump(&shared.counters.run);
        let failure = Shared::check_ctx(ctx)
            .and_then(|()| shared.take_call_failure())
            .err();
        let pending = match failure {
            Some(_) => VecDeque::new(),
            None => shared.collect_matches(query).into(),
        };
        Box::new(MemoryIterator {
            ctx: ctx.clone(),
            pending,
            failure,
        })
    }

    fn get_all(
        &self,
        ctx: &Context,
        query: &DriverQuery,
        dst: &mut Vec<DriverPropertyList>,
    ) -> DriverResult<Vec<DriverKey>> {
        let shared = &self.shared;
        bump(&shared.counters.get_all);
        shared.begin_call(ctx, 0, None)?;

        let (keys, entities): (Vec<_>, Vec<_>) = shared.collect_matches(query).into_iter().unzip();
        dst.extend(entities);
        Ok(keys)
    }

    fn count(&self, ctx: &Context, query: &DriverQuery) -> DriverResult<usize> {
        let shared = &self.shared;
        bump(&shared.counters.count);
        shared.begin_call(ctx, 0, None)?;
        Ok(shared.collect_matches(query).len())
    }

    fn allocate_ids(&self, ctx: &Context, keys: &[DriverKey]) -> DriverResult<Vec<DriverKey>> {
        let shared = &self.shared;
        bump(&shared.counters.allocate_ids);
        shared.begin_call(ctx, keys.len(), None)?;

        keys.iter()
            .map(|key| {
                validate_key(key, true)?;
                if !key.is_incomplete() {
                    return Err(DriverError::InvalidArgument(
                        "cannot allocate an id for a complete key".into(),
                    ));
                }
                Ok(shared.allocate(key))
            })
            .collect()
    }

    fn new_transaction(&self, ctx: &Context) -> DriverResult<Box<dyn DriverTransaction>> {
        bump(&self.shared.counters.transactions);
        Shared::check_ctx(ctx)?;
        self.shared.take_call_failure()?;

        let id = Uuid::now_v7().to_string();
        debug!(transaction = %id, "memory transaction started");
        Ok(Box::new(MemoryTransaction {
            id,
            ctx: ctx.clone(),
            shared: Arc::clone(&self.shared),
            state: Mutex::new(TxState::default()),
        }))
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

enum Mutation {
    Put {
        index: u64,
        key: DriverKey,
        properties: DriverPropertyList,
    },
    Delete {
        key: DriverKey,
    },
}

#[derive(Default)]
struct TxState {
    /// Version of every entity read, 0 if it was absent.
    reads: HashMap<DriverKey, u64>,
    mutations: Vec<Mutation>,
    next_index: u64,
}

struct MemoryTransaction {
    id: String,
    ctx: Context,
    shared: Arc<Shared>,
    state: Mutex<TxState>,
}

impl DriverTransaction for MemoryTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn put_multi(
        &self,
        keys: &[DriverKey],
        entities: &[DriverPropertyList],
    ) -> DriverResult<Vec<DriverPendingKey>> {
        let shared = &self.shared;
        bump(&shared.counters.tx_put_multi);
        shared.begin_call(&self.ctx, keys.len(), Some(entities.len()))?;

        // Buffered writes are all-or-nothing within one call.
        let errors = shared.slot_errors(keys, true);
        into_batch_result((), errors)?;

        let mut state = self.state.lock().expect("lock poisoned");
        let mut pending = Vec::with_capacity(keys.len());
        for (key, properties) in keys.iter().zip(entities) {
            let index = state.next_index;
            state.next_index += 1;
            state.mutations.push(Mutation::Put {
                index,
                key: key.clone(),
                properties: properties.clone(),
            });
            pending.push(DriverPendingKey {
                transaction: self.id.clone(),
                index,
            });
        }
        Ok(pending)
    }

    fn get_multi(&self, keys: &[DriverKey], dst: &mut [DriverPropertyList]) -> DriverResult<()> {
        let shared = &self.shared;
        bump(&shared.counters.tx_get_multi);
        shared.begin_call(&self.ctx, keys.len(), Some(dst.len()))?;

        let mut errors = shared.slot_errors(keys, false);
        let map = shared.entities.read().expect("lock poisoned");
        let mut state = self.state.lock().expect("lock poisoned");
        for (i, key) in keys.iter().enumerate() {
            if errors[i].is_some() {
                continue;
            }
            match map.get(key) {
                Some(record) => {
                    state.reads.entry(key.clone()).or_insert(record.version);
                    dst[i] = record.properties.clone();
                }
                None => {
                    state.reads.entry(key.clone()).or_insert(0);
                    errors[i] = Some(DriverError::NoSuchEntity);
                }
            }
        }
        into_batch_result((), errors)
    }

    fn delete_multi(&self, keys: &[DriverKey]) -> DriverResult<()> {
        let shared = &self.shared;
        bump(&shared.counters.tx_delete_multi);
        shared.begin_call(&self.ctx, keys.len(), None)?;

        let errors = shared.slot_errors(keys, false);
        into_batch_result((), errors)?;

        let mut state = self.state.lock().expect("lock poisoned");
        state
            .mutations
            .extend(keys.iter().map(|key| Mutation::Delete { key: key.clone() }));
        Ok(())
    }

    fn commit(self: Box<Self>) -> DriverResult<DriverCommit> {
        let MemoryTransaction {
            id,
            ctx,
            shared,
            state,
        } = *self;
        bump(&shared.counters.commits);
        Shared::check_ctx(&ctx)?;
        shared.take_call_failure()?;

        let state = state.into_inner().expect("lock poisoned");
        let mut map = shared.entities.write().expect("lock poisoned");
        for (key, seen) in &state.reads {
            let current = map.get(key).map_or(0, |record| record.version);
            if current != *seen {
                debug!(transaction = %id, key = ?key, "memory transaction conflict");
                return Err(DriverError::Concurrent);
            }
        }

        let mut commit = DriverCommit {
            transaction: id.clone(),
            keys: HashMap::new(),
        };
        for mutation in state.mutations {
            match mutation {
                Mutation::Put {
                    index,
                    key,
                    properties,
                } => {
                    let key = if key.is_incomplete() {
                        shared.allocate(&key)
                    } else {
                        key
                    };
                    let record = Record {
                        properties,
                        version: shared.tick(),
                    };
                    map.insert(key.clone(), record);
                    commit.keys.insert(index, key);
                }
                Mutation::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        debug!(transaction = %id, writes = commit.keys.len(), "memory transaction committed");
        Ok(commit)
    }

    fn rollback(self: Box<Self>) -> DriverResult<()> {
        bump(&self.shared.counters.rollbacks);
        debug!(transaction = %self.id, "memory transaction rolled back");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Iterator
// ---------------------------------------------------------------------------

struct MemoryIterator {
    ctx: Context,
    pending: VecDeque<(DriverKey, DriverPropertyList)>,
    failure: Option<DriverError>,
}

impl DriverIterator for MemoryIterator {
    fn next(&mut self, dst: &mut DriverPropertyList) -> DriverResult<DriverKey> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Shared::check_ctx(&self.ctx)?;
        match self.pending.pop_front() {
            Some((key, properties)) => {
                *dst = properties;
                Ok(key)
            }
            None => Err(DriverError::Done),
        }
    }
}

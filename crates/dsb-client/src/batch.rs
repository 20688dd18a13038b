//! Deferred batches.
//!
//! A batch queues puts, gets and deletes and runs each kind as one multi-key
//! call when executed: puts first, then gets, then deletes. Every queue call
//! returns the slot its outcome will occupy in [`BatchResults`].

use dsb_types::{
    Context, DatastoreError, DatastoreResult, Key, MultiError, PendingKey, PropertyList,
};
use tracing::debug;

use crate::client::Client;
use crate::transaction::Transaction;

#[derive(Debug, Default)]
struct Queue {
    put_keys: Vec<Key>,
    put_entities: Vec<PropertyList>,
    get_keys: Vec<Key>,
    delete_keys: Vec<Key>,
}

impl Queue {
    fn put(&mut self, key: Key, entity: PropertyList) -> usize {
        self.put_keys.push(key);
        self.put_entities.push(entity);
        self.put_keys.len() - 1
    }

    fn get(&mut self, key: Key) -> usize {
        self.get_keys.push(key);
        self.get_keys.len() - 1
    }

    fn delete(&mut self, key: Key) -> usize {
        self.delete_keys.push(key);
        self.delete_keys.len() - 1
    }

    fn len(&self) -> usize {
        self.put_keys.len() + self.get_keys.len() + self.delete_keys.len()
    }
}

/// Outcomes of an executed batch, indexed by the slots the queue calls
/// returned.
#[derive(Debug, PartialEq)]
pub struct BatchResults<K> {
    /// `Ok(Some(key))` for a stored entity. `Ok(None)` when the put went
    /// through but another put in the same call failed, so the store reported
    /// no key for it.
    pub puts: Vec<DatastoreResult<Option<K>>>,
    pub gets: Vec<DatastoreResult<PropertyList>>,
    pub deletes: Vec<DatastoreResult<()>>,
}

impl<K> BatchResults<K> {
    pub fn is_ok(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Every failure, puts first, then gets, then deletes.
    pub fn errors(&self) -> impl Iterator<Item = &DatastoreError> {
        let puts = self.puts.iter().filter_map(|r| r.as_ref().err());
        let gets = self.gets.iter().filter_map(|r| r.as_ref().err());
        let deletes = self.deletes.iter().filter_map(|r| r.as_ref().err());
        puts.chain(gets).chain(deletes)
    }

    /// `Ok` if every operation succeeded, otherwise a [`MultiError`] with one
    /// slot per queued operation in the same puts, gets, deletes order.
    pub fn check(&self) -> DatastoreResult<()> {
        let puts = self.puts.iter().map(|r| r.as_ref().err().cloned());
        let gets = self.gets.iter().map(|r| r.as_ref().err().cloned());
        let deletes = self.deletes.iter().map(|r| r.as_ref().err().cloned());
        MultiError::from_slots(puts.chain(gets).chain(deletes).collect()).into_result()
    }
}

/// Split a batch call's result into its value and one error slot per item.
fn split<T>(len: usize, result: DatastoreResult<T>) -> (Option<T>, Vec<Option<DatastoreError>>) {
    match result {
        Ok(value) => (Some(value), vec![None; len]),
        Err(DatastoreError::Multi(multi)) if multi.len() == len => (None, multi.into_slots()),
        Err(err) => (None, vec![Some(err); len]),
    }
}

fn put_results<K>(
    len: usize,
    result: DatastoreResult<Vec<K>>,
    fallback: impl Fn(usize) -> Option<K>,
) -> Vec<DatastoreResult<Option<K>>> {
    match split(len, result) {
        (Some(keys), _) => keys.into_iter().map(|k| Ok(Some(k))).collect(),
        (None, errors) => errors
            .into_iter()
            .enumerate()
            .map(|(i, err)| match err {
                Some(err) => Err(err),
                None => Ok(fallback(i)),
            })
            .collect(),
    }
}

fn get_results(
    result: DatastoreResult<()>,
    entities: Vec<PropertyList>,
) -> Vec<DatastoreResult<PropertyList>> {
    let (_, errors) = split(entities.len(), result);
    errors
        .into_iter()
        .zip(entities)
        .map(|(err, entity)| match err {
            Some(err) => Err(err),
            None => Ok(entity),
        })
        .collect()
}

fn unit_results(len: usize, result: DatastoreResult<()>) -> Vec<DatastoreResult<()>> {
    let (_, errors) = split(len, result);
    errors.into_iter().map(|err| err.map_or(Ok(()), Err)).collect()
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Operations queued against a [`Client`], run through the cache pipeline.
#[must_use = "a batch does nothing until exec is called"]
#[derive(Debug)]
pub struct Batch<'a> {
    client: &'a Client,
    ctx: &'a Context,
    queue: Queue,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(client: &'a Client, ctx: &'a Context) -> Self {
        Self {
            client,
            ctx,
            queue: Queue::default(),
        }
    }

    pub fn put(&mut self, key: Key, entity: PropertyList) -> usize {
        self.queue.put(key, entity)
    }

    pub fn get(&mut self, key: Key) -> usize {
        self.queue.get(key)
    }

    pub fn delete(&mut self, key: Key) -> usize {
        self.queue.delete(key)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exec(self) -> BatchResults<Key> {
        let Queue {
            put_keys,
            put_entities,
            get_keys,
            delete_keys,
        } = self.queue;
        debug!(
            puts = put_keys.len(),
            gets = get_keys.len(),
            deletes = delete_keys.len(),
            "executing batch"
        );
        let (client, ctx) = (self.client, self.ctx);

        let puts = if put_keys.is_empty() {
            Vec::new()
        } else {
            let result = client.put_multi(ctx, &put_keys, &put_entities);
            // A complete key is its own stored key.
            put_results(put_keys.len(), result, |i| {
                Some(&put_keys[i]).filter(|k| !k.is_incomplete()).cloned()
            })
        };

        let gets = if get_keys.is_empty() {
            Vec::new()
        } else {
            let mut entities = vec![PropertyList::new(); get_keys.len()];
            let result = client.get_multi(ctx, &get_keys, &mut entities);
            get_results(result, entities)
        };

        let deletes = if delete_keys.is_empty() {
            Vec::new()
        } else {
            unit_results(delete_keys.len(), client.delete_multi(ctx, &delete_keys))
        };

        BatchResults {
            puts,
            gets,
            deletes,
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionBatch
// ---------------------------------------------------------------------------

/// Operations queued against an open [`Transaction`].
///
/// Puts resolve to [`PendingKey`]s like [`Transaction::put_multi`].
#[must_use = "a batch does nothing until exec is called"]
#[derive(Debug)]
pub struct TransactionBatch<'t> {
    tx: &'t mut Transaction,
    queue: Queue,
}

impl<'t> TransactionBatch<'t> {
    pub(crate) fn new(tx: &'t mut Transaction) -> Self {
        Self {
            tx,
            queue: Queue::default(),
        }
    }

    pub fn put(&mut self, key: Key, entity: PropertyList) -> usize {
        self.queue.put(key, entity)
    }

    pub fn get(&mut self, key: Key) -> usize {
        self.queue.get(key)
    }

    pub fn delete(&mut self, key: Key) -> usize {
        self.queue.delete(key)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exec(self) -> BatchResults<PendingKey> {
        let Queue {
            put_keys,
            put_entities,
            get_keys,
            delete_keys,
        } = self.queue;
        let tx = self.tx;
        debug!(
            transaction = %tx.id(),
            puts = put_keys.len(),
            gets = get_keys.len(),
            deletes = delete_keys.len(),
            "executing transaction batch"
        );

        let puts = if put_keys.is_empty() {
            Vec::new()
        } else {
            let result = tx.put_multi(&put_keys, &put_entities);
            put_results(put_keys.len(), result, |_| None)
        };

        let gets = if get_keys.is_empty() {
            Vec::new()
        } else {
            let mut entities = vec![PropertyList::new(); get_keys.len()];
            let result = tx.get_multi(&get_keys, &mut entities);
            get_results(result, entities)
        };

        let deletes = if delete_keys.is_empty() {
            Vec::new()
        } else {
            unit_results(delete_keys.len(), tx.delete_multi(&delete_keys))
        };

        BatchResults {
            puts,
            gets,
            deletes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dsb_cache::InMemoryCache;
    use dsb_driver::InMemoryDriver;

    use crate::config::ClientConfig;

    fn entity(n: i64) -> PropertyList {
        PropertyList::new().with("n", n)
    }

    fn client() -> Client {
        Client::new(InMemoryDriver::new(), ClientConfig::new("proj"))
    }

    // -----------------------------------------------------------------------
    // Client batches
    // -----------------------------------------------------------------------

    #[test]
    fn runs_puts_before_gets_and_deletes() {
        let client = client();
        let ctx = Context::background();
        let kept = Key::id("Task", 1);
        let dropped = Key::id("Task", 2);
        client.put(&ctx, &dropped, &entity(0)).unwrap();

        let mut batch = client.batch(&ctx);
        let put = batch.put(kept.clone(), entity(1));
        let new = batch.put(Key::incomplete("Task"), entity(3));
        let got = batch.get(kept.clone());
        let del = batch.delete(dropped.clone());
        assert_eq!(batch.len(), 4);
        let results = batch.exec();

        assert!(results.is_ok());
        assert_eq!(results.check(), Ok(()));
        assert_eq!(results.puts[put], Ok(Some(kept.clone())));
        assert!(matches!(&results.puts[new], Ok(Some(k)) if !k.is_incomplete()));
        assert_eq!(results.gets[got], Ok(entity(1)));
        assert_eq!(results.deletes[del], Ok(()));
        assert!(client.get(&ctx, &dropped).unwrap_err().is_not_found());
    }

    #[test]
    fn reports_failures_per_item() {
        let client = client().with_cache(Arc::new(InMemoryCache::local()));
        let ctx = Context::background();
        client.put(&ctx, &Key::id("Task", 1), &entity(1)).unwrap();

        let mut batch = client.batch(&ctx);
        batch.get(Key::id("Task", 1));
        batch.get(Key::id("Task", 404));
        let results = batch.exec();

        assert!(!results.is_ok());
        assert_eq!(results.gets[0], Ok(entity(1)));
        assert_eq!(results.gets[1], Err(DatastoreError::NoSuchEntity));
        let Err(DatastoreError::Multi(multi)) = results.check() else {
            panic!("expected a batch error");
        };
        assert_eq!(multi.len(), 2);
        assert!(multi.get(0).is_none());
        assert_eq!(multi.get(1), Some(&DatastoreError::NoSuchEntity));
    }

    #[test]
    fn whole_call_failure_fills_every_slot() {
        let client = client();
        let ctx = Context::background();
        ctx.cancel();

        let mut batch = client.batch(&ctx);
        batch.put(Key::id("Task", 1), entity(1));
        batch.put(Key::id("Task", 2), entity(2));
        let results = batch.exec();

        assert_eq!(results.puts, vec![Err(DatastoreError::Cancelled); 2]);
        assert_eq!(results.errors().count(), 2);
    }

    #[test]
    fn empty_batch_makes_no_calls() {
        let driver = InMemoryDriver::new();
        let client = Client::new(driver.clone(), ClientConfig::new("proj"));
        let ctx = Context::background();

        let batch = client.batch(&ctx);
        assert!(batch.is_empty());
        let results = batch.exec();
        assert!(results.is_ok());
        assert_eq!(driver.stats().store_calls(), 0);
    }

    // -----------------------------------------------------------------------
    // Transaction batches
    // -----------------------------------------------------------------------

    #[test]
    fn transaction_batch_resolves_through_commit() {
        let client = client();
        let ctx = Context::background();
        let doomed = Key::id("Task", 9);
        client.put(&ctx, &doomed, &entity(9)).unwrap();

        let mut tx = client.new_transaction(&ctx).unwrap();
        let mut batch = tx.batch();
        let put = batch.put(Key::incomplete("Task"), entity(1));
        let got = batch.get(doomed.clone());
        batch.delete(doomed.clone());
        let results = batch.exec();
        assert!(results.is_ok());
        assert_eq!(results.gets[got], Ok(entity(9)));

        let Ok(Some(pending)) = results.puts[put].clone() else {
            panic!("expected a pending key");
        };
        let mut commit = tx.commit().unwrap();
        let key = commit.key(pending).unwrap();
        assert_eq!(client.get(&ctx, &key).unwrap(), entity(1));
        assert!(client.get(&ctx, &doomed).unwrap_err().is_not_found());
    }
}

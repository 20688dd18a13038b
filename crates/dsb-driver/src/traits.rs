//! The capability contract every storage driver implements.
//!
//! The client bridge depends on nothing else from a backend. Connection
//! setup, transport, and credentials stay behind these traits.

use dsb_types::Context;

use crate::error::DriverResult;
use crate::types::{
    DriverCommit, DriverKey, DriverPendingKey, DriverPropertyList, DriverQuery,
};

/// Non-transactional access to a document store.
///
/// Implementations must be safe to share across threads. Batch calls return
/// results aligned with their inputs; per-slot failures are reported as
/// [`DriverError::Multi`](crate::DriverError::Multi) with one slot per input.
/// A done context aborts the whole batch before any slot is applied.
pub trait DriverClient: Send + Sync {
    /// Write entities and return their complete keys.
    fn put_multi(
        &self,
        ctx: &Context,
        keys: &[DriverKey],
        entities: &[DriverPropertyList],
    ) -> DriverResult<Vec<DriverKey>>;

    /// Load entities into `dst`, slot by slot. Slots that failed are left
    /// untouched.
    fn get_multi(
        &self,
        ctx: &Context,
        keys: &[DriverKey],
        dst: &mut [DriverPropertyList],
    ) -> DriverResult<()>;

    fn delete_multi(&self, ctx: &Context, keys: &[DriverKey]) -> DriverResult<()>;

    /// Start a query cursor. Errors surface from [`DriverIterator::next`].
    fn run(&self, ctx: &Context, query: &DriverQuery) -> Box<dyn DriverIterator>;

    /// Run a query to completion, appending entities to `dst`.
    fn get_all(
        &self,
        ctx: &Context,
        query: &DriverQuery,
        dst: &mut Vec<DriverPropertyList>,
    ) -> DriverResult<Vec<DriverKey>>;

    /// Number of entities the query matches.
    fn count(&self, ctx: &Context, query: &DriverQuery) -> DriverResult<usize>;

    /// Reserve IDs for incomplete keys without writing entities.
    fn allocate_ids(&self, ctx: &Context, keys: &[DriverKey]) -> DriverResult<Vec<DriverKey>>;

    /// Begin a transaction bound to `ctx`.
    fn new_transaction(&self, ctx: &Context) -> DriverResult<Box<dyn DriverTransaction>>;
}

/// One open driver transaction.
///
/// Writes are buffered until [`DriverTransaction::commit`]; reads see the
/// store as of the read, not the transaction's own buffered writes.
pub trait DriverTransaction: Send + Sync {
    /// Opaque transaction identifier, stamped on pending keys.
    fn id(&self) -> &str;

    fn put_multi(
        &self,
        keys: &[DriverKey],
        entities: &[DriverPropertyList],
    ) -> DriverResult<Vec<DriverPendingKey>>;

    fn get_multi(&self, keys: &[DriverKey], dst: &mut [DriverPropertyList]) -> DriverResult<()>;

    fn delete_multi(&self, keys: &[DriverKey]) -> DriverResult<()>;

    fn commit(self: Box<Self>) -> DriverResult<DriverCommit>;

    fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// A query cursor.
pub trait DriverIterator: Send {
    /// Load the next entity into `dst` and return its key, or
    /// [`DriverError::Done`](crate::DriverError::Done) when exhausted.
    fn next(&mut self, dst: &mut DriverPropertyList) -> DriverResult<DriverKey>;
}

//! Bridges from portable types to a driver.
//!
//! - [`OriginalStoreBridge`] — uncached, non-transactional store calls
//! - [`TransactionBridge`] — calls inside one open transaction
//! - [`CacheBridge`] — the cache pipeline layered over both
//! - [`QueryIterator`] — query cursor

pub mod cache;
pub mod iterator;
pub mod original;
pub mod transaction;

pub use cache::CacheBridge;
pub use iterator::{Entities, QueryIterator};
pub use original::OriginalStoreBridge;
pub use transaction::TransactionBridge;

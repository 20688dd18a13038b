//! Cache-aware datastore client for dsbridge.
//!
//! [`Client`] sits between application code and a storage driver. Entity reads
//! go through an ordered pipeline of cache layers before reaching the store;
//! writes reach the store first and then update or invalidate the layers.
//! Transactions are explicit [`Transaction`] handles whose commit resolves
//! [`PendingKey`]s into final keys.
//!
//! ```
//! use std::sync::Arc;
//! use dsb_client::{Client, ClientConfig, Context, InMemoryCache, InMemoryDriver, PropertyList};
//!
//! let client = Client::new(InMemoryDriver::new(), ClientConfig::new("demo"))
//!     .with_cache(Arc::new(InMemoryCache::local()));
//! let ctx = Context::background();
//!
//! let key = client.name_key("Task", "docs");
//! client.put(&ctx, &key, &PropertyList::new().with("done", false)).unwrap();
//! assert_eq!(client.get(&ctx, &key).unwrap().len(), 1);
//! ```
//!
//! # Modules
//!
//! - [`client`] — the [`Client`] facade
//! - [`transaction`] — [`Transaction`] and [`Commit`]
//! - [`batch`] — deferred [`Batch`] and [`TransactionBatch`]
//! - [`bridge`] — store, transaction, and cache bridges plus [`QueryIterator`]
//! - [`translate`] / [`normalize`] — conversions to and from driver forms
//! - [`config`] — [`ClientConfig`]

pub mod batch;
pub mod bridge;
pub mod client;
pub mod config;
pub mod normalize;
pub mod transaction;
pub mod translate;

pub use batch::{Batch, BatchResults, TransactionBatch};
pub use bridge::{CacheBridge, Entities, OriginalStoreBridge, QueryIterator, TransactionBridge};
pub use client::Client;
pub use config::ClientConfig;
pub use transaction::{Commit, Transaction};

// Re-export the types callers need alongside the client
pub use dsb_cache::{CacheConfig, CacheInfo, CacheLayer, ClientInfo, InMemoryCache};
pub use dsb_driver::{DriverClient, InMemoryDriver};
pub use dsb_types::{
    Context, DatastoreError, DatastoreResult, Key, KeyId, MultiError, PendingKey, Property,
    PropertyList, Query, Value,
};

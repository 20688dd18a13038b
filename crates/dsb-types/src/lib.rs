//! Portable types for dsbridge.
//!
//! Every other dsbridge crate depends on `dsb-types`. Nothing here knows about
//! a concrete storage driver: these are the representations callers and cache
//! layers work with, translated to and from driver-native forms at the bridge.
//!
//! # Key Types
//!
//! - [`Key`] / [`KeyId`] — immutable record identifiers with ancestor paths
//! - [`PendingKey`] — placeholder key for a write inside an open transaction
//! - [`PropertyList`] / [`Property`] / [`Value`] — one record's ordered fields
//! - [`Query`] — kind query with filters, orders, ancestor, and paging
//! - [`Context`] — request-scoped cancellation and deadline
//! - [`DatastoreError`] / [`MultiError`] — the normalized error taxonomy

pub mod context;
pub mod error;
pub mod key;
pub mod property;
pub mod query;

pub use context::Context;
pub use error::{DatastoreError, DatastoreResult, MultiError};
pub use key::{Key, KeyId, PendingKey};
pub use property::{Property, PropertyList, Value};
pub use query::{Direction, Filter, FilterOp, Order, Query};

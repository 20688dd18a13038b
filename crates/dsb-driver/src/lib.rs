//! Storage driver contract for dsbridge.
//!
//! A driver is the raw backend behind the client: it owns transport,
//! connection setup, and credentials, and exposes only the minimal batch,
//! query, and transaction capabilities the client bridge needs.
//!
//! # Traits
//!
//! - [`DriverClient`] — non-transactional batch get/put/delete, queries, ID allocation
//! - [`DriverTransaction`] — buffered transactional batches, commit, rollback
//! - [`DriverIterator`] — query cursor
//!
//! # Backends
//!
//! - [`InMemoryDriver`] — ordered-map store with optimistic transactions, call
//!   counters, and fault injection; used for tests and embedding
//!
//! Driver types ([`DriverKey`], [`DriverValue`], ...) are deliberately distinct
//! from the portable types in `dsb-types`; the client translates between them.

pub mod error;
mod eval;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{DriverError, DriverResult};
pub use memory::{DriverStats, InMemoryDriver};
pub use traits::{DriverClient, DriverIterator, DriverTransaction};
pub use types::{
    DriverCommit, DriverFilter, DriverKey, DriverOperator, DriverOrder, DriverPendingKey,
    DriverProperty, DriverPropertyList, DriverQuery, DriverValue,
};

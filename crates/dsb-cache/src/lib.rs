//! Pluggable cache layers for dsbridge.
//!
//! A client owns an ordered pipeline of zero or more cache layers. Reads
//! consult the layers in order before going to the store; writes and deletes
//! update or invalidate every layer after the store has accepted them. Layers
//! are a performance optimization only: their failures are reported and
//! otherwise ignored, and the store result is always authoritative.
//!
//! # Modules
//!
//! - [`layer`] — the [`CacheLayer`] trait, [`CacheInfo`], [`ClientInfo`]
//! - [`memory`] — [`InMemoryCache`], a bounded in-process layer
//! - [`config`] — [`CacheConfig`]
//! - [`error`] — [`CacheError`]

pub mod config;
pub mod error;
pub mod layer;
pub mod memory;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use layer::{CacheInfo, CacheLayer, CacheOp, ClientInfo};
pub use memory::{CacheStats, InMemoryCache};

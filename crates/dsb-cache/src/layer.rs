use std::fmt;

use dsb_types::{Context, Key, PropertyList};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, CacheResult};

// ---------------------------------------------------------------------------
// CacheInfo
// ---------------------------------------------------------------------------

/// Identity of the client a cache call is made on behalf of.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub project_id: String,
    pub namespace: Option<String>,
}

impl ClientInfo {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            namespace: None,
        }
    }
}

/// Per-operation context handed to every cache layer call.
///
/// Carries the request context and the calling client's identity. It has no
/// mutable state; layers use it for scoping (e.g. per-project key prefixes).
#[derive(Clone, Copy, Debug)]
pub struct CacheInfo<'a> {
    pub context: &'a Context,
    pub client: &'a ClientInfo,
    /// The operation is running inside a transaction.
    pub in_transaction: bool,
}

impl<'a> CacheInfo<'a> {
    pub fn new(context: &'a Context, client: &'a ClientInfo) -> Self {
        Self {
            context,
            client,
            in_transaction: false,
        }
    }

    /// The same info, flagged as transactional.
    pub fn transactional(self) -> Self {
        Self {
            in_transaction: true,
            ..self
        }
    }
}

// ---------------------------------------------------------------------------
// CacheOp
// ---------------------------------------------------------------------------

/// Which layer hook failed, for error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOp {
    Get,
    Put,
    Delete,
}

impl fmt::Display for CacheOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Put => write!(f, "put"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

// ---------------------------------------------------------------------------
// CacheLayer trait
// ---------------------------------------------------------------------------

/// One stage of the cache pipeline.
///
/// Layers are consulted in registration order. Implementations must be safe
/// for concurrent use by many non-transactional callers; the bridge adds no
/// locking of its own.
///
/// The trait is object-safe and `Send + Sync` so layers can be stored in a
/// `Vec<Arc<dyn CacheLayer>>`.
pub trait CacheLayer: Send + Sync {
    /// Human-readable name of this layer (e.g., "memory", "redis").
    fn name(&self) -> &str;

    /// Whether the layer may be written during a transaction. Transactional
    /// reads always go to the store; they refresh transaction-aware layers and
    /// bypass the others.
    fn transaction_aware(&self) -> bool {
        false
    }

    /// Look up `keys`; the result has one slot per key, `None` for a miss.
    fn get_multi(
        &self,
        info: &CacheInfo<'_>,
        keys: &[Key],
    ) -> CacheResult<Vec<Option<PropertyList>>>;

    /// Store entities for `keys` (same length).
    fn put_multi(
        &self,
        info: &CacheInfo<'_>,
        keys: &[Key],
        entities: &[PropertyList],
    ) -> CacheResult<()>;

    /// Invalidate `keys`. Missing keys are not an error.
    fn delete_multi(&self, info: &CacheInfo<'_>, keys: &[Key]) -> CacheResult<()>;

    /// Side channel for failures of this layer's hooks. The default logs a
    /// warning.
    fn report_error(&self, op: CacheOp, error: &CacheError) {
        warn!(layer = self.name(), op = %op, error = %error, "cache layer failed; using store result");
    }
}

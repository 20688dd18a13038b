use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{DatastoreError, DatastoreResult};

/// Longest ancestor path a key may have, counting the key itself.
pub const MAX_KEY_DEPTH: usize = 100;

/// Upper bound on the binary form of an encoded key.
const MAX_ENCODED_KEY_BYTES: u64 = 16 * 1024;

fn key_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_ENCODED_KEY_BYTES)
}

/// The identifying part of a key: a numeric ID, a string name, or nothing yet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// The store assigns an ID when the entity is written.
    Incomplete,
    /// A store-assigned or caller-chosen numeric ID (must be positive).
    Id(i64),
    /// A caller-chosen string name (must be non-empty).
    Name(String),
}

/// An immutable record key: kind, ID or name, optional parent, namespace.
///
/// Two keys are equal iff their namespaces, kinds, identifiers and whole
/// ancestor chains are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    namespace: String,
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
}

impl Key {
    /// A key with a numeric ID.
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self::with_key_id(kind, KeyId::Id(id))
    }

    /// A key with a string name.
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_key_id(kind, KeyId::Name(name.into()))
    }

    /// An incomplete key; the store allocates its ID on write.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self::with_key_id(kind, KeyId::Incomplete)
    }

    pub fn with_key_id(kind: impl Into<String>, id: KeyId) -> Self {
        Self {
            namespace: String::new(),
            kind: kind.into(),
            id,
            parent: None,
        }
    }

    /// Return a copy of this key nested under `parent`.
    ///
    /// The key inherits the parent's namespace.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.namespace = parent.namespace.clone();
        self.parent = Some(Box::new(parent));
        self
    }

    /// Return a copy of this key in `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key_id(&self) -> &KeyId {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// The numeric ID, or 0 if the key is named or incomplete.
    pub fn int_id(&self) -> i64 {
        match self.id {
            KeyId::Id(id) => id,
            _ => 0,
        }
    }

    /// The string name, or `""` if the key has a numeric ID or is incomplete.
    pub fn string_name(&self) -> &str {
        match &self.id {
            KeyId::Name(name) => name,
            _ => "",
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self.id, KeyId::Incomplete)
    }

    /// Iterate over the ancestor chain, nearest parent first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Key> {
        std::iter::successors(self.parent(), |k| k.parent())
    }

    /// The root of the ancestor path (this key if it has no parent).
    pub fn root(&self) -> &Key {
        self.ancestors().last().unwrap_or(self)
    }

    /// Returns `true` if `ancestor` appears in this key's ancestor chain.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.ancestors().any(|k| k == ancestor)
    }

    /// Check the structural constraints every store key must satisfy.
    ///
    /// Kinds and names must be non-empty, numeric IDs positive, every ancestor
    /// complete and in the same namespace as its child, and the path no longer
    /// than [`MAX_KEY_DEPTH`].
    pub fn validate(&self) -> DatastoreResult<()> {
        let depth = self.ancestors().count() + 1;
        if depth > MAX_KEY_DEPTH {
            return Err(DatastoreError::InvalidArgument(format!(
                "key path has {depth} elements, more than {MAX_KEY_DEPTH}"
            )));
        }
        self.validate_path()
    }

    fn validate_path(&self) -> DatastoreResult<()> {
        if self.kind.is_empty() {
            return Err(DatastoreError::InvalidArgument("key kind is empty".into()));
        }
        match &self.id {
            KeyId::Id(id) if *id <= 0 => {
                return Err(DatastoreError::InvalidArgument(format!(
                    "key {self} has non-positive id {id}"
                )));
            }
            KeyId::Name(name) if name.is_empty() => {
                return Err(DatastoreError::InvalidArgument(format!(
                    "key of kind {} has an empty name",
                    self.kind
                )));
            }
            _ => {}
        }
        if let Some(parent) = self.parent() {
            if parent.is_incomplete() {
                return Err(DatastoreError::InvalidArgument(format!(
                    "key {self} has an incomplete ancestor"
                )));
            }
            if parent.namespace != self.namespace {
                return Err(DatastoreError::InvalidArgument(format!(
                    "key {self} is in a different namespace than its parent"
                )));
            }
            parent.validate_path()?;
        }
        Ok(())
    }

    /// Encode as an opaque URL-safe string.
    ///
    /// Fails with `InvalidArgument` for keys too large to decode again.
    pub fn encode(&self) -> DatastoreResult<String> {
        let bytes = key_codec()
            .serialize(self)
            .map_err(|e| DatastoreError::InvalidArgument(format!("key cannot be encoded: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Decode a string produced by [`Key::encode`].
    pub fn decode(encoded: &str) -> DatastoreResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| DatastoreError::InvalidArgument(format!("bad encoded key: {e}")))?;
        let key: Key = key_codec()
            .deserialize(&bytes)
            .map_err(|e| DatastoreError::InvalidArgument(format!("bad encoded key: {e}")))?;
        key.validate()?;
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}")?;
        }
        match &self.id {
            KeyId::Incomplete => write!(f, "/{},incomplete", self.kind),
            KeyId::Id(id) => write!(f, "/{},{id}", self.kind),
            KeyId::Name(name) => write!(f, "/{},{name:?}", self.kind),
        }
    }
}

/// Placeholder for a key written inside an uncommitted transaction.
///
/// Resolved to a concrete [`Key`] through the commit of the transaction that
/// produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingKey {
    transaction: String,
    slot: u64,
}

impl PendingKey {
    pub fn new(transaction: impl Into<String>, slot: u64) -> Self {
        Self {
            transaction: transaction.into(),
            slot,
        }
    }

    /// The ID of the transaction that produced this key.
    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    /// Position of the write within its transaction.
    pub fn slot(&self) -> u64 {
        self.slot
    }
}

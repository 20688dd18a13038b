use std::fmt;

use thiserror::Error;

/// Normalized errors surfaced by every dsbridge operation.
///
/// Driver-specific failures are mapped into this taxonomy before they reach
/// callers, so application code never matches on backend error types.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DatastoreError {
    /// The requested entity does not exist.
    #[error("datastore: no such entity")]
    NoSuchEntity,

    /// The entity already exists and the write conflicted with it.
    #[error("datastore: entity already exists")]
    EntityExists,

    /// A key, property, or query was malformed.
    #[error("datastore: invalid argument: {0}")]
    InvalidArgument(String),

    /// Parallel key/value slices had different lengths.
    #[error("datastore: keys and values have different lengths ({keys} != {values})")]
    LengthMismatch { keys: usize, values: usize },

    /// The request context was cancelled.
    #[error("datastore: context cancelled")]
    Cancelled,

    /// The request context deadline passed.
    #[error("datastore: deadline exceeded")]
    DeadlineExceeded,

    /// A transactional operation ran without an active transaction.
    #[error("datastore: unexpected context: no active transaction")]
    UnexpectedContext,

    /// The transaction conflicted with another one and was not committed.
    #[error("datastore: concurrent transaction")]
    ConcurrentTransaction,

    /// The iterator has no more results.
    #[error("datastore: iterator done")]
    Done,

    /// Per-slot errors for a batch operation.
    #[error("{0}")]
    Multi(MultiError),

    /// An unrecognized backend error, passed through as text.
    #[error("datastore: {0}")]
    Unknown(String),
}

impl DatastoreError {
    /// Returns `true` for [`DatastoreError::NoSuchEntity`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchEntity)
    }

    /// Returns `true` for cancellation or deadline errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Collapse a batch error for a single-item call.
    ///
    /// A [`DatastoreError::Multi`] yields its slot-0 error; every other error
    /// is returned as-is.
    pub fn into_single(self) -> Self {
        match self {
            Self::Multi(multi) => multi
                .into_slots()
                .into_iter()
                .next()
                .flatten()
                .unwrap_or_else(|| Self::Unknown("empty batch error".into())),
            other => other,
        }
    }
}

/// Result alias for dsbridge operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

// ---------------------------------------------------------------------------
// MultiError
// ---------------------------------------------------------------------------

/// Positionally aligned per-slot errors for a batch call.
///
/// The length always equals the batch length. `None` marks a slot that
/// succeeded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiError(Vec<Option<DatastoreError>>);

impl MultiError {
    /// A batch-sized error with every slot successful.
    pub fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    /// Build from explicit slots.
    pub fn from_slots(slots: Vec<Option<DatastoreError>>) -> Self {
        Self(slots)
    }

    /// Record an error for slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, err: DatastoreError) {
        self.0[index] = Some(err);
    }

    /// The error for slot `index`, if that slot failed.
    pub fn get(&self, index: usize) -> Option<&DatastoreError> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Batch length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if at least one slot failed.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Option::is_some)
    }

    /// Number of failed slots.
    pub fn error_count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }

    /// Iterate over the slots in batch order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&DatastoreError>> {
        self.0.iter().map(Option::as_ref)
    }

    pub fn into_slots(self) -> Vec<Option<DatastoreError>> {
        self.0
    }

    /// Convert into `Err(Multi)` when any slot failed, `Ok(())` otherwise.
    pub fn into_result(self) -> DatastoreResult<()> {
        if self.has_errors() {
            Err(DatastoreError::Multi(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failed = self.0.iter().enumerate().filter_map(|(i, e)| Some((i, e.as_ref()?)));
        match failed.next() {
            None => write!(f, "datastore: no errors in batch of {}", self.len()),
            Some((index, first)) => write!(
                f,
                "datastore: {} of {} slots failed (first at {index}: {first})",
                self.error_count(),
                self.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_error_alignment() {
        let mut multi = MultiError::new(3);
        multi.set(1, DatastoreError::EntityExists);
        assert_eq!(multi.len(), 3);
        assert!(multi.get(0).is_none());
        assert_eq!(multi.get(1), Some(&DatastoreError::EntityExists));
        assert!(multi.get(2).is_none());
        assert_eq!(multi.error_count(), 1);
    }

    #[test]
    fn clean_multi_error_is_ok() {
        assert!(MultiError::new(4).into_result().is_ok());
    }

    #[test]
    fn into_single_takes_slot_zero() {
        let multi = MultiError::from_slots(vec![Some(DatastoreError::NoSuchEntity)]);
        let err = DatastoreError::Multi(multi).into_single();
        assert_eq!(err, DatastoreError::NoSuchEntity);
    }

    #[test]
    fn into_single_passes_other_errors() {
        assert_eq!(
            DatastoreError::Cancelled.into_single(),
            DatastoreError::Cancelled
        );
    }

    #[test]
    fn display_mentions_first_failure() {
        let multi = MultiError::from_slots(vec![None, Some(DatastoreError::NoSuchEntity), None]);
        let text = multi.to_string();
        assert!(text.contains("1 of 3"));
        assert!(text.contains("no such entity"));
    }
}

use dsb_driver::DriverIterator;
use dsb_types::{DatastoreError, DatastoreResult, Key, PropertyList};

use crate::normalize::normalize;
use crate::translate::{to_driver_properties, to_portable_key, to_portable_properties};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Iterating,
    Exhausted,
}

/// Cursor over query results in portable types.
///
/// A query that failed to build is carried as the iterator's first error and
/// returned from every call to [`QueryIterator::next`] without touching a
/// driver cursor. Once the cursor reports the end, every later call returns
/// [`DatastoreError::Done`].
pub struct QueryIterator {
    cursor: Option<Box<dyn DriverIterator>>,
    first_error: Option<DatastoreError>,
    state: State,
}

impl QueryIterator {
    pub(crate) fn new(cursor: Box<dyn DriverIterator>) -> Self {
        Self {
            cursor: Some(cursor),
            first_error: None,
            state: State::Iterating,
        }
    }

    pub(crate) fn failed(err: DatastoreError) -> Self {
        Self {
            cursor: None,
            first_error: Some(err),
            state: State::Iterating,
        }
    }

    /// Load the next entity into `dst` and return its key.
    ///
    /// Returns [`DatastoreError::Done`] once the results are exhausted. For
    /// keys-only queries `dst` comes back empty.
    pub fn next(&mut self, dst: &mut PropertyList) -> DatastoreResult<Key> {
        if let Some(err) = &self.first_error {
            return Err(err.clone());
        }
        if self.state == State::Exhausted {
            return Err(DatastoreError::Done);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(DatastoreError::Done);
        };
        let mut buf = to_driver_properties(dst)?;
        match cursor.next(&mut buf) {
            Ok(key) => {
                *dst = to_portable_properties(buf)?;
                Ok(to_portable_key(key))
            }
            Err(err) => {
                let err = normalize(err);
                if err == DatastoreError::Done {
                    self.state = State::Exhausted;
                    self.cursor = None;
                }
                Err(err)
            }
        }
    }

    /// Whether the cursor has reported the end of the results.
    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }

    /// Adapt into a standard iterator of `(key, entity)` pairs.
    ///
    /// Ends after the last result, or after yielding the first error.
    pub fn entities(self) -> Entities {
        Entities {
            inner: self,
            fused: false,
        }
    }
}

impl std::fmt::Debug for QueryIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryIterator")
            .field("state", &self.state)
            .field("first_error", &self.first_error)
            .finish()
    }
}

/// Standard-iterator view of a [`QueryIterator`].
#[derive(Debug)]
pub struct Entities {
    inner: QueryIterator,
    fused: bool,
}

impl Iterator for Entities {
    type Item = DatastoreResult<(Key, PropertyList)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        let mut dst = PropertyList::new();
        match self.inner.next(&mut dst) {
            Ok(key) => Some(Ok((key, dst))),
            Err(DatastoreError::Done) => {
                self.fused = true;
                None
            }
            Err(err) => {
                self.fused = true;
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for Entities {}

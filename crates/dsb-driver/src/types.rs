use std::cmp::Ordering;
use std::collections::HashMap;

/// Driver-native key.
///
/// Follows the wire convention of document stores: `id == 0` and an empty
/// `name` mean the key is incomplete.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverKey {
    pub namespace: String,
    pub kind: String,
    pub id: i64,
    pub name: String,
    pub parent: Option<Box<DriverKey>>,
}

impl DriverKey {
    pub fn is_incomplete(&self) -> bool {
        self.id == 0 && self.name.is_empty()
    }

    /// Returns `true` if `self` equals `ancestor` or descends from it.
    pub fn is_descendant_of(&self, ancestor: &DriverKey) -> bool {
        let mut current = Some(self);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = key.parent.as_deref();
        }
        false
    }
}

/// Driver-native property value. Timestamps travel as microseconds since the
/// Unix epoch.
#[derive(Clone, Debug, PartialEq)]
pub enum DriverValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Str(String),
    Blob(Vec<u8>),
    TimestampMicros(i64),
    Key(Box<DriverKey>),
    Array(Vec<DriverValue>),
}

impl DriverValue {
    /// Ordering used by query filters and sort orders. Values of different
    /// types are incomparable, except that integers and floats compare
    /// numerically.
    pub fn compare(&self, other: &DriverValue) -> Option<Ordering> {
        use DriverValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (Float64(a), Float64(b)) => a.partial_cmp(b),
            (Int64(a), Float64(b)) => (*a as f64).partial_cmp(b),
            (Float64(a), Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Blob(a), Blob(b)) => Some(a.cmp(b)),
            (TimestampMicros(a), TimestampMicros(b)) => Some(a.cmp(b)),
            (Key(a), Key(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting query results.
    ///
    /// Values rank by type first: null, numbers, timestamps, booleans, blobs,
    /// strings, keys, arrays. Integers and floats share a rank and compare
    /// numerically, with an integer before an equal float. Floats use
    /// [`f64::total_cmp`], so NaN sorts after every other number.
    pub fn total_cmp(&self, other: &DriverValue) -> Ordering {
        use DriverValue::*;
        match (self, other) {
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.total_cmp(b),
            (Int64(a), Float64(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Float64(a), Int64(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Array(a), Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ordering = x.total_cmp(y);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => match self.rank().cmp(&other.rank()) {
                Ordering::Equal => self.compare(other).unwrap_or(Ordering::Equal),
                ordering => ordering,
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DriverValue::Null => 0,
            DriverValue::Int64(_) | DriverValue::Float64(_) => 1,
            DriverValue::TimestampMicros(_) => 2,
            DriverValue::Bool(_) => 3,
            DriverValue::Blob(_) => 4,
            DriverValue::Str(_) => 5,
            DriverValue::Key(_) => 6,
            DriverValue::Array(_) => 7,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DriverProperty {
    pub name: String,
    pub value: DriverValue,
    pub no_index: bool,
}

/// One entity's properties in driver form.
pub type DriverPropertyList = Vec<DriverProperty>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverOperator {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DriverFilter {
    pub property: String,
    pub operator: DriverOperator,
    pub value: DriverValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverOrder {
    pub property: String,
    pub descending: bool,
}

/// A query plan in driver form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DriverQuery {
    pub namespace: String,
    pub kind: String,
    pub ancestor: Option<DriverKey>,
    pub filters: Vec<DriverFilter>,
    pub orders: Vec<DriverOrder>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub keys_only: bool,
}

/// Placeholder key returned by a transactional put.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DriverPendingKey {
    pub transaction: String,
    pub index: u64,
}

/// Result of a committed transaction; resolves pending keys.
#[derive(Clone, Debug, Default)]
pub struct DriverCommit {
    pub transaction: String,
    pub keys: HashMap<u64, DriverKey>,
}

impl DriverCommit {
    /// The final key for a pending key produced by this transaction.
    pub fn key(&self, pending: &DriverPendingKey) -> Option<DriverKey> {
        if pending.transaction != self.transaction {
            return None;
        }
        self.keys.get(&pending.index).cloned()
    }
}

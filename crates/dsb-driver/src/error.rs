/// Errors reported by a storage driver.
///
/// These are driver-native; the client bridge normalizes them before they
/// reach callers.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// The entity was not found.
    #[error("no such entity")]
    NoSuchEntity,

    /// The write conflicted with an existing entity.
    #[error("entity already exists")]
    EntityExists,

    /// A key, entity, or query was rejected by the driver.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Per-slot failures for a batch call, aligned with the input batch.
    #[error("{} of {} slots failed", failed_slots(.0), .0.len())]
    Multi(Vec<Option<DriverError>>),

    /// The request context was cancelled.
    #[error("context cancelled")]
    Cancelled,

    /// The request context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The transaction conflicted with a concurrent writer.
    #[error("transaction aborted: concurrent modification")]
    Concurrent,

    /// The transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The cursor has no more results.
    #[error("no more items in iterator")]
    Done,

    /// The backend could not be reached or failed internally.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

fn failed_slots(slots: &[Option<DriverError>]) -> usize {
    slots.iter().filter(|e| e.is_some()).count()
}

/// Result alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

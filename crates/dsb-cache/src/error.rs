/// Errors from cache layer operations.
///
/// A cache failure never fails a datastore operation; the bridge reports it
/// through [`CacheLayer::report_error`](crate::CacheLayer::report_error) and
/// carries on with the store result.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache backend failed or could not be reached.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A cached value could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// A layer returned a batch whose length differs from the request.
    #[error("cache returned {actual} slots for {expected} keys")]
    Misaligned { expected: usize, actual: usize },
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

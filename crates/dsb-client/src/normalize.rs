//! Mapping of driver errors into the portable [`DatastoreError`] taxonomy.

use dsb_driver::DriverError;
use dsb_types::{DatastoreError, MultiError};

/// Normalize a driver error. Batch errors keep their slot layout.
pub fn normalize(err: DriverError) -> DatastoreError {
    match err {
        DriverError::NoSuchEntity => DatastoreError::NoSuchEntity,
        DriverError::EntityExists => DatastoreError::EntityExists,
        DriverError::InvalidArgument(msg) => DatastoreError::InvalidArgument(msg),
        DriverError::Cancelled => DatastoreError::Cancelled,
        DriverError::DeadlineExceeded => DatastoreError::DeadlineExceeded,
        DriverError::Concurrent => DatastoreError::ConcurrentTransaction,
        DriverError::TransactionClosed => DatastoreError::UnexpectedContext,
        DriverError::Done => DatastoreError::Done,
        DriverError::Unavailable(msg) => DatastoreError::Unknown(format!("unavailable: {msg}")),
        DriverError::Multi(slots) => DatastoreError::Multi(MultiError::from_slots(
            slots.into_iter().map(|slot| slot.map(normalize)).collect(),
        )),
    }
}

/// Normalize an error from a batch call of `len` slots.
///
/// A short slot list is padded with successful slots so the result always
/// lines up with the caller's batch. A cancellation in any slot aborts the
/// whole batch and is returned on its own.
pub fn normalize_batch(err: DriverError, len: usize) -> DatastoreError {
    match normalize(err) {
        DatastoreError::Multi(multi) => {
            let mut slots = multi.into_slots();
            if let Some(cancel) = slots.iter().flatten().find(|e| e.is_cancellation()) {
                return cancel.clone();
            }
            if slots.len() > len {
                return DatastoreError::Unknown(format!(
                    "driver reported {} slots for a batch of {len}",
                    slots.len()
                ));
            }
            slots.resize(len, None);
            DatastoreError::Multi(MultiError::from_slots(slots))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_map_one_to_one() {
        assert_eq!(normalize(DriverError::NoSuchEntity), DatastoreError::NoSuchEntity);
        assert_eq!(normalize(DriverError::EntityExists), DatastoreError::EntityExists);
        assert_eq!(
            normalize(DriverError::Concurrent),
            DatastoreError::ConcurrentTransaction
        );
        assert_eq!(normalize(DriverError::Done), DatastoreError::Done);
        assert_eq!(
            normalize(DriverError::TransactionClosed),
            DatastoreError::UnexpectedContext
        );
    }

    #[test]
    fn unknown_errors_keep_their_text() {
        match normalize(DriverError::Unavailable("backend down".into())) {
            DatastoreError::Unknown(msg) => assert!(msg.contains("backend down")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn multi_error_keeps_alignment() {
        let err = DriverError::Multi(vec![None, Some(DriverError::EntityExists), None]);
        let DatastoreError::Multi(multi) = normalize(err) else {
            panic!("expected a batch error");
        };
        assert_eq!(multi.len(), 3);
        assert_eq!(multi.get(1), Some(&DatastoreError::EntityExists));
        assert!(multi.get(0).is_none() && multi.get(2).is_none());
    }

    #[test]
    fn short_batch_is_padded() {
        let err = DriverError::Multi(vec![Some(DriverError::NoSuchEntity)]);
        let DatastoreError::Multi(multi) = normalize_batch(err, 3) else {
            panic!("expected a batch error");
        };
        assert_eq!(multi.len(), 3);
        assert_eq!(multi.error_count(), 1);
    }

    #[test]
    fn cancellation_collapses_the_batch() {
        let err = DriverError::Multi(vec![None, Some(DriverError::Cancelled)]);
        assert_eq!(normalize_batch(err, 2), DatastoreError::Cancelled);
    }

    #[test]
    fn oversized_batch_is_unknown() {
        let err = DriverError::Multi(vec![None, None, Some(DriverError::NoSuchEntity)]);
        assert!(matches!(normalize_batch(err, 2), DatastoreError::Unknown(_)));
    }
}

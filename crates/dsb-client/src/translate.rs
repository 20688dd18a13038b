//! Conversions between portable values and driver-native forms.
//!
//! Pure and stateless. Conversions toward the driver validate their input and
//! fail with [`DatastoreError::InvalidArgument`]; conversions back only fail on
//! values the portable model cannot represent.

use chrono::DateTime;
use dsb_driver::{
    DriverFilter, DriverKey, DriverOperator, DriverOrder, DriverPendingKey, DriverProperty,
    DriverPropertyList, DriverQuery, DriverValue,
};
use dsb_types::{
    DatastoreError, DatastoreResult, Direction, FilterOp, Key, KeyId, PendingKey, Property,
    PropertyList, Query, Value,
};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Validate `key` and convert it to driver form.
pub fn to_driver_key(key: &Key) -> DatastoreResult<DriverKey> {
    key.validate()?;
    Ok(driver_key_unchecked(key))
}

fn driver_key_unchecked(key: &Key) -> DriverKey {
    let (id, name) = match key.key_id() {
        KeyId::Incomplete => (0, String::new()),
        KeyId::Id(id) => (*id, String::new()),
        KeyId::Name(name) => (0, name.clone()),
    };
    DriverKey {
        namespace: key.namespace().to_string(),
        kind: key.kind().to_string(),
        id,
        name,
        parent: key.parent().map(|p| Box::new(driver_key_unchecked(p))),
    }
}

/// Convert a batch of keys; the first invalid key rejects the whole batch.
pub fn to_driver_keys(keys: &[Key]) -> DatastoreResult<Vec<DriverKey>> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            to_driver_key(key).map_err(|e| match e {
                DatastoreError::InvalidArgument(msg) => {
                    DatastoreError::InvalidArgument(format!("key at index {i}: {msg}"))
                }
                other => other,
            })
        })
        .collect()
}

pub fn to_portable_key(key: DriverKey) -> Key {
    let id = if key.id != 0 {
        KeyId::Id(key.id)
    } else if !key.name.is_empty() {
        KeyId::Name(key.name)
    } else {
        KeyId::Incomplete
    };
    let portable = Key::with_key_id(key.kind, id);
    match key.parent {
        Some(parent) => portable.with_parent(to_portable_key(*parent)),
        None => portable.with_namespace(key.namespace),
    }
}

pub fn to_portable_keys(keys: Vec<DriverKey>) -> Vec<Key> {
    keys.into_iter().map(to_portable_key).collect()
}

pub fn to_driver_pending_key(key: &PendingKey) -> DriverPendingKey {
    DriverPendingKey {
        transaction: key.transaction().to_string(),
        index: key.slot(),
    }
}

pub fn to_portable_pending_key(key: DriverPendingKey) -> PendingKey {
    PendingKey::new(key.transaction, key.index)
}

pub fn to_portable_pending_keys(keys: Vec<DriverPendingKey>) -> Vec<PendingKey> {
    keys.into_iter().map(to_portable_pending_key).collect()
}

// ---------------------------------------------------------------------------
// Values and property lists
// ---------------------------------------------------------------------------

pub fn to_driver_value(value: &Value) -> DatastoreResult<DriverValue> {
    Ok(match value {
        Value::Null => DriverValue::Null,
        Value::Bool(v) => DriverValue::Bool(*v),
        Value::Int(v) => DriverValue::Int64(*v),
        Value::Float(v) => DriverValue::Float64(*v),
        Value::String(v) => DriverValue::Str(v.clone()),
        Value::Bytes(v) => DriverValue::Blob(v.clone()),
        Value::Timestamp(v) => DriverValue::TimestampMicros(v.timestamp_micros()),
        Value::Key(k) => DriverValue::Key(Box::new(to_driver_key(k)?)),
        Value::Array(items) => DriverValue::Array(
            items
                .iter()
                .map(to_driver_value)
                .collect::<DatastoreResult<_>>()?,
        ),
    })
}

pub fn to_portable_value(value: DriverValue) -> DatastoreResult<Value> {
    Ok(match value {
        DriverValue::Null => Value::Null,
        DriverValue::Bool(v) => Value::Bool(v),
        DriverValue::Int64(v) => Value::Int(v),
        DriverValue::Float64(v) => Value::Float(v),
        DriverValue::Str(v) => Value::String(v),
        DriverValue::Blob(v) => Value::Bytes(v),
        DriverValue::TimestampMicros(micros) => {
            let ts = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                DatastoreError::InvalidArgument(format!("timestamp out of range: {micros}us"))
            })?;
            Value::Timestamp(ts)
        }
        DriverValue::Key(k) => Value::Key(to_portable_key(*k)),
        DriverValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_portable_value)
                .collect::<DatastoreResult<_>>()?,
        ),
    })
}

pub fn to_driver_properties(list: &PropertyList) -> DatastoreResult<DriverPropertyList> {
    list.iter()
        .map(|p| {
            if p.name.is_empty() {
                return Err(DatastoreError::InvalidArgument("empty property name".into()));
            }
            Ok(DriverProperty {
                name: p.name.clone(),
                value: to_driver_value(&p.value)?,
                no_index: p.no_index,
            })
        })
        .collect()
}

pub fn to_portable_properties(list: DriverPropertyList) -> DatastoreResult<PropertyList> {
    list.into_iter()
        .map(|p| {
            Ok(Property {
                name: p.name,
                value: to_portable_value(p.value)?,
                no_index: p.no_index,
            })
        })
        .collect()
}

pub fn to_driver_property_lists(lists: &[PropertyList]) -> DatastoreResult<Vec<DriverPropertyList>> {
    lists.iter().map(to_driver_properties).collect()
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Convert a query; a query carrying a build error is returned as that error.
pub fn to_driver_query(query: &Query) -> DatastoreResult<DriverQuery> {
    if let Some(err) = query.first_error() {
        return Err(err.clone());
    }
    if query.kind().is_empty() {
        return Err(DatastoreError::InvalidArgument("query kind is empty".into()));
    }
    let filters = query
        .filters()
        .iter()
        .map(|f| {
            Ok(DriverFilter {
                property: f.property.clone(),
                operator: match f.op {
                    FilterOp::Eq => DriverOperator::Equal,
                    FilterOp::Lt => DriverOperator::LessThan,
                    FilterOp::Le => DriverOperator::LessThanOrEqual,
                    FilterOp::Gt => DriverOperator::GreaterThan,
                    FilterOp::Ge => DriverOperator::GreaterThanOrEqual,
                },
                value: to_driver_value(&f.value)?,
            })
        })
        .collect::<DatastoreResult<_>>()?;
    let orders = query
        .orders()
        .iter()
        .map(|o| DriverOrder {
            property: o.property.clone(),
            descending: o.direction == Direction::Descending,
        })
        .collect();
    Ok(DriverQuery {
        namespace: query.namespace_name().to_string(),
        kind: query.kind().to_string(),
        ancestor: query.ancestor_key().map(to_driver_key).transpose()?,
        filters,
        orders,
        limit: query.limit_value(),
        offset: query.offset_value(),
        keys_only: query.is_keys_only(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn key_with_ancestors_maps_fieldwise() {
        let key = Key::name("Task", "docs")
            .with_parent(Key::id("List", 4).with_namespace("ns"));
        let driver = to_driver_key(&key).unwrap();
        assert_eq!(driver.kind, "Task");
        assert_eq!(driver.name, "docs");
        assert_eq!(driver.id, 0);
        assert_eq!(driver.namespace, "ns");
        let parent = driver.parent.as_deref().unwrap();
        assert_eq!((parent.kind.as_str(), parent.id), ("List", 4));
        assert_eq!(to_portable_key(driver), key);
    }

    #[test]
    fn incomplete_key_uses_zero_id() {
        let driver = to_driver_key(&Key::incomplete("Task")).unwrap();
        assert!(driver.is_incomplete());
        assert!(to_portable_key(driver).is_incomplete());
    }

    #[test]
    fn invalid_key_reports_batch_index() {
        let err = to_driver_keys(&[Key::id("Task", 1), Key::id("Task", -1)]).unwrap_err();
        match err {
            DatastoreError::InvalidArgument(msg) => assert!(msg.contains("index 1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timestamps_travel_as_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let driver = to_driver_value(&Value::Timestamp(ts)).unwrap();
        assert_eq!(driver, DriverValue::TimestampMicros(ts.timestamp_micros()));
        assert_eq!(to_portable_value(driver).unwrap(), Value::Timestamp(ts));
    }

    #[test]
    fn key_values_are_validated() {
        let list = PropertyList::new().with("owner", Key::id("User", 0));
        assert!(to_driver_properties(&list).is_err());
    }

    #[test]
    fn empty_property_name_is_rejected() {
        let list = PropertyList::from(vec![Property::new("", 1i64)]);
        assert!(matches!(
            to_driver_properties(&list),
            Err(DatastoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn query_first_error_wins() {
        let query = Query::new("Task").filter("bogus", 1i64);
        assert!(matches!(
            to_driver_query(&query),
            Err(DatastoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn query_maps_filters_and_orders() {
        let query = Query::new("Task")
            .filter("priority >", 1i64)
            .order("-priority")
            .limit(5)
            .offset(2)
            .keys_only();
        let driver = to_driver_query(&query).unwrap();
        assert_eq!(driver.filters[0].operator, DriverOperator::GreaterThan);
        assert!(driver.orders[0].descending);
        assert_eq!(driver.limit, Some(5));
        assert_eq!(driver.offset, 2);
        assert!(driver.keys_only);
    }

    #[test]
    fn pending_keys_map_slot_to_index() {
        let pending = PendingKey::new("tx-9", 3);
        let driver = to_driver_pending_key(&pending);
        assert_eq!(driver.index, 3);
        assert_eq!(to_portable_pending_key(driver), pending);
    }
}

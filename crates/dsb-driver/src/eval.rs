//! Query evaluation over an in-memory entity map.

use std::cmp::Ordering;

use crate::types::{
    DriverFilter, DriverKey, DriverOperator, DriverProperty, DriverPropertyList, DriverQuery,
    DriverValue,
};

/// Indexed value of a property, if the entity has one.
fn indexed<'a>(props: &'a [DriverProperty], name: &str) -> Option<&'a DriverValue> {
    props
        .iter()
        .find(|p| p.name == name && !p.no_index)
        .map(|p| &p.value)
}

fn value_matches(value: &DriverValue, filter: &DriverFilter) -> bool {
    if let DriverValue::Array(items) = value {
        return items.iter().any(|item| value_matches(item, filter));
    }
    let Some(ordering) = value.compare(&filter.value) else {
        return false;
    };
    match filter.operator {
        DriverOperator::Equal => ordering == Ordering::Equal,
        DriverOperator::LessThan => ordering == Ordering::Less,
        DriverOperator::LessThanOrEqual => ordering != Ordering::Greater,
        DriverOperator::GreaterThan => ordering == Ordering::Greater,
        DriverOperator::GreaterThanOrEqual => ordering != Ordering::Less,
    }
}

/// Whether an entity satisfies the query's kind, namespace, ancestor, and
/// filters. Entities without an indexed value for a filtered or ordered
/// property never match.
pub(crate) fn matches(query: &DriverQuery, key: &DriverKey, props: &[DriverProperty]) -> bool {
    if key.kind != query.kind || key.namespace != query.namespace {
        return false;
    }
    if let Some(ancestor) = &query.ancestor {
        if !key.is_descendant_of(ancestor) {
            return false;
        }
    }
    let filtered = query.filters.iter().all(|filter| {
        indexed(props, &filter.property).is_some_and(|value| value_matches(value, filter))
    });
    filtered
        && query
            .orders
            .iter()
            .all(|order| indexed(props, &order.property).is_some())
}

/// Sort matches by the query orders, falling back to key order.
pub(crate) fn sort(query: &DriverQuery, results: &mut [(DriverKey, DriverPropertyList)]) {
    results.sort_by(|(ka, pa), (kb, pb)| {
        for order in &query.orders {
            let ordering = match (indexed(pa, &order.property), indexed(pb, &order.property)) {
                (Some(a), Some(b)) => a.total_cmp(b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            };
            let ordering = if order.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        ka.cmp(kb)
    });
}

/// Apply offset and limit.
pub(crate) fn page<T>(query: &DriverQuery, results: Vec<T>) -> Vec<T> {
    let iter = results.into_iter().skip(query.offset);
    match query.limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DriverOrder;

    fn key(id: i64) -> DriverKey {
        DriverKey {
            kind: "Task".into(),
            id,
            ..Default::default()
        }
    }

    fn prop(name: &str, value: DriverValue) -> DriverProperty {
        DriverProperty {
            name: name.into(),
            value,
            no_index: false,
        }
    }

    fn query() -> DriverQuery {
        DriverQuery {
            kind: "Task".into(),
            ..Default::default()
        }
    }

    #[test]
    fn filters_compare_values() {
        let mut q = query();
        q.filters.push(DriverFilter {
            property: "priority".into(),
            operator: DriverOperator::GreaterThanOrEqual,
            value: DriverValue::Int64(2),
        });
        assert!(matches(&q, &key(1), &[prop("priority", DriverValue::Int64(3))]));
        assert!(!matches(&q, &key(1), &[prop("priority", DriverValue::Int64(1))]));
        assert!(!matches(&q, &key(1), &[]));
    }

    #[test]
    fn unindexed_properties_are_invisible() {
        let mut q = query();
        q.filters.push(DriverFilter {
            property: "body".into(),
            operator: DriverOperator::Equal,
            value: DriverValue::Str("x".into()),
        });
        let mut body = prop("body", DriverValue::Str("x".into()));
        body.no_index = true;
        assert!(!matches(&q, &key(1), &[body]));
    }

    #[test]
    fn array_matches_any_element() {
        let mut q = query();
        q.filters.push(DriverFilter {
            property: "tags".into(),
            operator: DriverOperator::Equal,
            value: DriverValue::Str("urgent".into()),
        });
        let tags = DriverValue::Array(vec![
            DriverValue::Str("home".into()),
            DriverValue::Str("urgent".into()),
        ]);
        assert!(matches(&q, &key(1), &[prop("tags", tags)]));
    }

    #[test]
    fn sorts_descending_then_by_key() {
        let mut q = query();
        q.orders.push(DriverOrder {
            property: "rank".into(),
            descending: true,
        });
        let mut rows = vec![
            (key(1), vec![prop("rank", DriverValue::Int64(1))]),
            (key(2), vec![prop("rank", DriverValue::Int64(5))]),
            (key(3), vec![prop("rank", DriverValue::Int64(5))]),
        ];
        sort(&q, &mut rows);
        let ids: Vec<i64> = rows.iter().map(|(k, _)| k.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn sorts_mixed_value_types_without_panicking() {
        let mut q = query();
        q.orders.push(DriverOrder {
            property: "p".into(),
            descending: false,
        });
        let mut rows: Vec<(DriverKey, DriverPropertyList)> = (1..=200)
            .map(|id| {
                let value = match id % 4 {
                    0 => DriverValue::Int64(id % 7),
                    1 => DriverValue::Float64((id % 5) as f64 + 0.5),
                    2 => DriverValue::Str(format!("s{}", id % 3)),
                    _ => DriverValue::Float64(f64::NAN),
                };
                (key(id), vec![prop("p", value)])
            })
            .collect();
        sort(&q, &mut rows);

        let ranks: Vec<u8> = rows
            .iter()
            .map(|(_, props)| match &props[0].value {
                DriverValue::Int64(_) | DriverValue::Float64(_) => 0,
                _ => 1,
            })
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
        assert!(matches!(&rows[149].1[0].value, DriverValue::Float64(f) if f.is_nan()));
        assert!(matches!(&rows[150].1[0].value, DriverValue::Str(_)));
    }

    #[test]
    fn total_order_ranks_types_and_mixes_numbers() {
        let int = DriverValue::Int64(2);
        let float = DriverValue::Float64(2.0);
        assert_eq!(int.total_cmp(&float), Ordering::Less);
        assert_eq!(float.total_cmp(&int), Ordering::Greater);
        assert_eq!(DriverValue::Float64(1.5).total_cmp(&int), Ordering::Less);
        assert_eq!(DriverValue::Null.total_cmp(&int), Ordering::Less);
        assert_eq!(
            DriverValue::Str("a".into()).total_cmp(&DriverValue::Int64(9)),
            Ordering::Greater
        );
        assert_eq!(
            DriverValue::Float64(f64::NAN).total_cmp(&DriverValue::Float64(f64::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn paging() {
        let mut q = query();
        q.offset = 1;
        q.limit = Some(2);
        assert_eq!(page(&q, vec![1, 2, 3, 4]), vec![2, 3]);
    }
}

use std::fmt;

use crate::error::DatastoreError;
use crate::key::Key;
use crate::property::Value;

/// Comparison operator of a property filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "=" => Some(Self::Eq),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub property: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

/// A query over one kind.
///
/// Builder methods never fail. A malformed filter or order is recorded as the
/// query's first error, and running the query yields that error before any
/// store access.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    kind: String,
    namespace: String,
    ancestor: Option<Key>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    limit: Option<usize>,
    offset: usize,
    keys_only: bool,
    first_error: Option<DatastoreError>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: String::new(),
            ancestor: None,
            filters: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: 0,
            keys_only: false,
            first_error: None,
        }
    }

    /// Add a filter such as `("done =", false)` or `("priority >=", 2)`.
    pub fn filter(mut self, expr: &str, value: impl Into<Value>) -> Self {
        let expr = expr.trim();
        let parsed = expr
            .rsplit_once(char::is_whitespace)
            .and_then(|(name, op)| Some((name.trim(), FilterOp::parse(op)?)))
            .filter(|(name, _)| !name.is_empty());
        match parsed {
            Some((name, op)) => self.filters.push(Filter {
                property: name.to_string(),
                op,
                value: value.into(),
            }),
            None => self.record_error(format!("invalid filter {expr:?}")),
        }
        self
    }

    /// Add a sort order; a leading `-` sorts descending.
    pub fn order(mut self, field: &str) -> Self {
        let field = field.trim();
        let (property, direction) = match field.strip_prefix('-') {
            Some(rest) => (rest.trim(), Direction::Descending),
            None => (field, Direction::Ascending),
        };
        if property.is_empty() {
            self.record_error("empty order field".to_string());
        } else {
            self.orders.push(Order {
                property: property.to_string(),
                direction,
            });
        }
        self
    }

    /// Restrict results to descendants of `ancestor` (and the ancestor itself).
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        if ancestor.is_incomplete() {
            self.record_error("ancestor key is incomplete".to_string());
        } else {
            self.namespace = ancestor.namespace().to_string();
            self.ancestor = Some(ancestor);
        }
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Return keys only; property lists come back empty.
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    fn record_error(&mut self, message: String) {
        if self.first_error.is_none() {
            self.first_error = Some(DatastoreError::InvalidArgument(message));
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    pub fn ancestor_key(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> usize {
        self.offset
    }

    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// The first error recorded while building the query.
    pub fn first_error(&self) -> Option<&DatastoreError> {
        self.first_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filters() {
        let q = Query::new("Task").filter("done =", false).filter(" priority >= ", 2i64);
        assert!(q.first_error().is_none());
        assert_eq!(q.filters().len(), 2);
        assert_eq!(q.filters()[1].property, "priority");
        assert_eq!(q.filters()[1].op, FilterOp::Ge);
    }

    #[test]
    fn bad_filter_records_first_error_only() {
        let q = Query::new("Task")
            .filter("done", true)
            .filter("x ~", 1i64)
            .order("");
        let err = q.first_error().expect("first error recorded");
        assert!(err.to_string().contains("\"done\""));
        assert!(q.filters().is_empty());
    }

    #[test]
    fn descending_order() {
        let q = Query::new("Task").order("-created").order("title");
        assert_eq!(q.orders()[0].direction, Direction::Descending);
        assert_eq!(q.orders()[0].property, "created");
        assert_eq!(q.orders()[1].direction, Direction::Ascending);
    }

    #[test]
    fn incomplete_ancestor_is_an_error() {
        let q = Query::new("Task").ancestor(Key::incomplete("List"));
        assert!(q.first_error().is_some());
    }
}

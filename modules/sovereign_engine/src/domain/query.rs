//! Backend-neutral query model
//!
//! A `TableQuery` is what the domain hands to the `QueryService` port: a table,
//! a select expression, AND-combined predicates over (possibly dotted) column
//! paths, ordering, an optional offset/limit window and a count mode.

use crate::contract::{Row, SortSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { column: String, value: Value },
    Gte { column: String, value: Value },
    Lte { column: String, value: Value },
    /// Membership; an empty list matches nothing
    In { column: String, values: Vec<Value> },
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Self::Eq { column, .. }
            | Self::Gte { column, .. }
            | Self::Lte { column, .. }
            | Self::In { column, .. } => column,
        }
    }

    /// Filters through an embedded relation rather than a column of the table itself
    pub fn is_nested(&self) -> bool {
        self.column().contains('.')
    }

    /// Predicate no row satisfies
    pub fn nothing(column: impl Into<String>) -> Self {
        Self::In {
            column: column.into(),
            values: Vec::new(),
        }
    }

    /// Evaluate against a row; `None` for nested paths, which need the embedded relation
    pub fn matches(&self, row: &Row) -> Option<bool> {
        if self.is_nested() {
            return None;
        }
        Some(self.test(row.get(self.column()).unwrap_or(&Value::Null)))
    }

    /// Test an already resolved column value
    pub fn test(&self, actual: &Value) -> bool {
        match self {
            Self::Eq { value, .. } => values_equal(actual, value),
            Self::Gte { value, .. } => matches!(
                compare_values(actual, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lte { value, .. } => matches!(
                compare_values(actual, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::In { values, .. } => values.iter().any(|v| values_equal(actual, v)),
        }
    }
}

/// Equality with numbers compared by value (`1` equals `1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between comparable scalars; ISO timestamps order as strings
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// Rows only
    #[default]
    None,
    /// Rows plus the exact size of the matching set
    Exact,
    /// Exact count only, no rows
    Head,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQuery {
    pub table: String,
    pub select: String,
    pub predicates: Vec<Predicate>,
    pub order: Vec<SortSpec>,
    pub range: Option<PageRange>,
    pub count: CountMode,
}

impl TableQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: "*".to_string(),
            predicates: Vec::new(),
            order: Vec::new(),
            range: None,
            count: CountMode::None,
        }
    }

    pub fn select(mut self, expression: impl Into<String>) -> Self {
        self.select = expression.into();
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::Eq {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn order_by(mut self, sort: SortSpec) -> Self {
        self.order.push(sort);
        self
    }

    /// Window of `limit` rows starting at `offset`
    pub fn window(mut self, offset: usize, limit: usize) -> Self {
        self.range = Some(PageRange { offset, limit });
        self
    }

    /// Count-only request
    pub fn head(mut self) -> Self {
        self.count = CountMode::Head;
        self.range = None;
        self.order.clear();
        self
    }

    pub fn is_head(&self) -> bool {
        self.count == CountMode::Head
    }

    pub fn has_nested_predicates(&self) -> bool {
        self.predicates.iter().any(Predicate::is_nested)
    }
}

/// Backend answer to a `TableQuery`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResponse {
    pub rows: Vec<Row>,
    /// Present for `CountMode::Exact` and `CountMode::Head`
    pub count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn head_drops_window_and_order() {
        let query = TableQuery::new("tickets")
            .order_by(SortSpec::desc("created_at"))
            .window(50, 50)
            .head();
        assert!(query.is_head());
        assert!(query.range.is_none());
        assert!(query.order.is_empty());
    }

    #[test]
    fn nested_predicates_are_detected() {
        let query = TableQuery::new("tickets").eq("status", "open");
        assert!(!query.has_nested_predicates());

        let query = query.eq("branches.area_id", "a-1");
        assert!(query.has_nested_predicates());
    }

    #[test]
    fn local_matching_skips_nested_paths() {
        let row: Row = serde_json::from_value(json!({
            "status": "open",
            "quantity": 3,
            "created_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        let open = Predicate::Eq {
            column: "status".to_string(),
            value: json!("open"),
        };
        assert_eq!(open.matches(&row), Some(true));

        let since = Predicate::Gte {
            column: "created_at".to_string(),
            value: json!("2024-01-01"),
        };
        assert_eq!(since.matches(&row), Some(true));

        let few = Predicate::Lte {
            column: "quantity".to_string(),
            value: json!(2.5),
        };
        assert_eq!(few.matches(&row), Some(false));

        assert_eq!(Predicate::nothing("id").matches(&row), Some(false));

        let nested = Predicate::Eq {
            column: "branches.area_id".to_string(),
            value: json!("a-1"),
        };
        assert_eq!(nested.matches(&row), None);
    }

    #[test]
    fn predicates_serialize_with_op_tag() {
        let predicate = Predicate::Gte {
            column: "created_at".to_string(),
            value: json!("2024-01-01"),
        };
        let value = serde_json::to_value(&predicate).unwrap();
        assert_eq!(
            value,
            json!({"op": "gte", "column": "created_at", "value": "2024-01-01"})
        );
    }
}

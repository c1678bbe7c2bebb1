//! Client filter composition
//!
//! Filters combine with AND. A range becomes inclusive `gte`/`lte` bounds, an
//! array becomes membership and a scalar becomes equality. Callers layer RBAC
//! on top of the result; client filters can only narrow.

use super::query::{Predicate, TableQuery};
use crate::contract::{EngineError, FilterSet, FilterValue};
use serde_json::Value;

impl FilterValue {
    /// Interpret a raw client value. `None` means "no filter" for this column.
    pub fn from_json(value: Value) -> Option<FilterValue> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::Array(values) if values.is_empty() => None,
            Value::Array(values) => Some(FilterValue::AnyOf(values)),
            Value::Object(mut bounds) if bounds.contains_key("start") || bounds.contains_key("end") => {
                let start = bounds.remove("start").filter(is_present);
                let end = bounds.remove("end").filter(is_present);
                if start.is_none() && end.is_none() {
                    None
                } else {
                    Some(FilterValue::Range { start, end })
                }
            }
            scalar => Some(FilterValue::Equals(scalar)),
        }
    }

    /// Predicates for `column`; empty when the value constrains nothing
    pub fn predicates(&self, column: &str) -> Vec<Predicate> {
        match self {
            FilterValue::Range { start, end } => {
                let mut predicates = Vec::with_capacity(2);
                if let Some(start) = start {
                    predicates.push(Predicate::Gte {
                        column: column.to_string(),
                        value: start.clone(),
                    });
                }
                if let Some(end) = end {
                    predicates.push(Predicate::Lte {
                        column: column.to_string(),
                        value: end.clone(),
                    });
                }
                predicates
            }
            FilterValue::AnyOf(values) if values.is_empty() => Vec::new(),
            FilterValue::AnyOf(values) => vec![Predicate::In {
                column: column.to_string(),
                values: values.clone(),
            }],
            FilterValue::Equals(value) => vec![Predicate::Eq {
                column: column.to_string(),
                value: value.clone(),
            }],
        }
    }
}

fn is_present(value: &Value) -> bool {
    !matches!(value, Value::Null) && value.as_str() != Some("")
}

/// Parse a raw JSON object of client filters
pub fn parse_filters(raw: Value) -> Result<FilterSet, EngineError> {
    let Value::Object(entries) = raw else {
        return Err(EngineError::InvalidFilter {
            column: String::new(),
            reason: "filters must be a JSON object".to_string(),
        });
    };

    let mut filters = FilterSet::new();
    for (column, value) in entries {
        if column.is_empty() {
            return Err(EngineError::InvalidFilter {
                column,
                reason: "empty column name".to_string(),
            });
        }
        if let Some(filter) = FilterValue::from_json(value) {
            filters.insert(column, filter);
        }
    }
    Ok(filters)
}

/// AND every filter into `query`
pub fn apply_filters(mut query: TableQuery, filters: &FilterSet) -> TableQuery {
    for (column, filter) in filters {
        query.predicates.extend(filter.predicates(column));
    }
    query
}

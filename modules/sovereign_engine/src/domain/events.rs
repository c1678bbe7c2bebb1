//! Realtime change events and the optimistic page patches they trigger
//!
//! Events arrive from the backend subscription of an entity's target table:
//! - Inserted: prepended to the held page, which is truncated to the page size
//! - Updated: merged into the held row with the same primary key
//! - Deleted: removed from the held page by primary key
//!
//! Patches are unverified. The controller reconciles with a debounced refresh.

use crate::contract::{PagedResult, Row, SOFT_DELETE_COLUMN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Inserted(RowChange),
    Updated(RowChange),
    /// Carries the deleted row (at least its primary key)
    Deleted(RowChange),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: String,
    pub row: Row,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn inserted(table: impl Into<String>, row: Row) -> Self {
        Self::Inserted(RowChange::now(table, row))
    }

    pub fn updated(table: impl Into<String>, row: Row) -> Self {
        Self::Updated(RowChange::now(table, row))
    }

    pub fn deleted(table: impl Into<String>, row: Row) -> Self {
        Self::Deleted(RowChange::now(table, row))
    }

    pub fn change(&self) -> &RowChange {
        match self {
            Self::Inserted(change) | Self::Updated(change) | Self::Deleted(change) => change,
        }
    }

    pub fn table(&self) -> &str {
        &self.change().table
    }
}

impl RowChange {
    fn now(table: impl Into<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            row,
            timestamp: Utc::now(),
        }
    }
}

/// Apply an event to the held page. Returns whether the page changed.
pub fn patch_page(
    page: &mut PagedResult,
    event: &ChangeEvent,
    primary_key: &str,
    soft_delete: bool,
) -> bool {
    match event {
        ChangeEvent::Inserted(change) => {
            let Some(id) = change.row.get(primary_key) else {
                return false;
            };
            // a replayed insert for a row we already hold is a merge
            if let Some(existing) = find_row(&mut page.rows, primary_key, id) {
                merge_into(existing, &change.row);
                return true;
            }
            page.rows.insert(0, change.row.clone());
            page.rows.truncate(page.page_size);
            page.total_count += 1;
            true
        }
        ChangeEvent::Updated(change) => {
            let Some(id) = change.row.get(primary_key) else {
                return false;
            };
            if soft_delete && is_soft_deleted(&change.row) {
                return remove_row(page, primary_key, id);
            }
            match find_row(&mut page.rows, primary_key, id) {
                Some(existing) => {
                    merge_into(existing, &change.row);
                    true
                }
                None => false,
            }
        }
        ChangeEvent::Deleted(change) => match change.row.get(primary_key) {
            Some(id) => remove_row(page, primary_key, id),
            None => false,
        },
    }
}

fn find_row<'a>(rows: &'a mut [Row], primary_key: &str, id: &Value) -> Option<&'a mut Row> {
    rows.iter_mut().find(|row| row.get(primary_key) == Some(id))
}

fn merge_into(existing: &mut Row, patch: &Row) {
    for (column, value) in patch {
        existing.insert(column.clone(), value.clone());
    }
}

fn remove_row(page: &mut PagedResult, primary_key: &str, id: &Value) -> bool {
    let before = page.rows.len();
    page.rows.retain(|row| row.get(primary_key) != Some(id));
    let removed = page.rows.len() != before;
    if removed {
        page.total_count = page.total_count.saturating_sub(1);
    }
    removed
}

fn is_soft_deleted(row: &Row) -> bool {
    row.get(SOFT_DELETE_COLUMN) == Some(&Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn full_page(size: usize) -> PagedResult {
        PagedResult {
            rows: (0..size)
                .map(|i| row(json!({"id": format!("t{i}"), "status": "open"})))
                .collect(),
            page: 0,
            page_size: size,
            total_count: 120,
        }
    }

    #[test]
    fn insert_prepends_and_truncates() {
        let mut page = full_page(50);
        let event = ChangeEvent::inserted("tickets", row(json!({"id": "new", "status": "open"})));

        assert!(patch_page(&mut page, &event, "id", true));
        assert_eq!(page.rows.len(), 50);
        assert_eq!(page.rows[0]["id"], json!("new"));
        assert_eq!(page.rows[49]["id"], json!("t48"));
        assert_eq!(page.total_count, 121);
    }

    #[test]
    fn update_merges_by_primary_key() {
        let mut page = full_page(3);
        let event = ChangeEvent::updated("tickets", row(json!({"id": "t1", "status": "closed"})));

        assert!(patch_page(&mut page, &event, "id", true));
        assert_eq!(page.rows[1]["status"], json!("closed"));
        assert_eq!(page.rows.len(), 3);
    }

    #[test]
    fn update_for_unknown_row_is_ignored() {
        let mut page = full_page(3);
        let event = ChangeEvent::updated("tickets", row(json!({"id": "zz", "status": "closed"})));
        assert!(!patch_page(&mut page, &event, "id", true));
    }

    #[test]
    fn soft_delete_update_removes_the_row() {
        let mut page = full_page(3);
        let event = ChangeEvent::updated("tickets", row(json!({"id": "t2", "is_deleted": true})));

        assert!(patch_page(&mut page, &event, "id", true));
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.total_count, 119);
    }

    #[test]
    fn delete_removes_by_primary_key() {
        let mut page = full_page(3);
        let event = ChangeEvent::deleted("tickets", row(json!({"id": "t0"})));

        assert!(patch_page(&mut page, &event, "id", false));
        assert!(page.rows.iter().all(|r| r["id"] != json!("t0")));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ChangeEvent::deleted("tickets", row(json!({"id": "t0"})));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], json!("deleted"));
        assert_eq!(value["table"], json!("tickets"));
    }
}

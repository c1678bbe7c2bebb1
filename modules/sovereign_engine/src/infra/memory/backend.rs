//! In-memory query service
//!
//! Evaluates `TableQuery` against seeded tables. Embeds in the select
//! expression are resolved through foreign keys and attached to returned rows;
//! `!inner` embeds drop rows whose link is missing. Dotted predicates are
//! evaluated against the embedded objects.

use crate::contract::{OrgLevel, Row, DEFAULT_PRIMARY_KEY};
use crate::domain::events::ChangeEvent;
use crate::domain::query::{compare_values, values_equal, CountMode, QueryResponse, TableQuery};
use crate::domain::repository::{ChangeStream, QueryService};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

type RpcHandler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
type FailureRule = Arc<dyn Fn(&TableQuery) -> bool + Send + Sync>;

enum Procedure {
    /// Runs the `query` parameter unwindowed and returns the rows
    Export,
    Custom(RpcHandler),
}

#[derive(Default)]
pub struct InMemoryBackend {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    /// (table, embedded table) -> foreign key column on `table`
    links: RwLock<HashMap<(String, String), String>>,
    procedures: RwLock<HashMap<String, Procedure>>,
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    failures: RwLock<Vec<FailureRule>>,
    log: Mutex<Vec<TableQuery>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in bulk export procedure under `name`
    pub fn with_export_rpc(self, name: &str) -> Self {
        self.procedures.write().insert(name.to_string(), Procedure::Export);
        self
    }

    pub fn register_rpc<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.procedures
            .write()
            .insert(name.to_string(), Procedure::Custom(Arc::new(handler)));
    }

    /// Declare the foreign key used to embed `embedded` into rows of `table`.
    ///
    /// Hierarchy tables need no declaration: they link through their standard key.
    pub fn link(&self, table: &str, embedded: &str, foreign_key: &str) {
        self.links.write().insert(
            (table.to_string(), embedded.to_string()),
            foreign_key.to_string(),
        );
    }

    /// Append rows to `table` without publishing events
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.tables.write();
        let stored = tables.entry(table.to_string()).or_default();
        stored.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(row) => Some(row),
            _ => None,
        }));
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Fail every select matching `rule`
    pub fn fail_when<F>(&self, rule: F)
    where
        F: Fn(&TableQuery) -> bool + Send + Sync + 'static,
    {
        self.failures.write().push(Arc::new(rule));
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Every select received so far, including failed ones
    pub fn queries(&self) -> Vec<TableQuery> {
        self.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Broadcast an event without touching stored rows
    pub fn emit(&self, event: ChangeEvent) {
        let sender = self.sender(event.table());
        // no subscribers is fine
        let _ = sender.send(event);
    }

    /// Live change subscriptions on `table`
    pub fn subscriber_count(&self, table: &str) -> usize {
        self.channels
            .lock()
            .get(table)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, table: &str) -> broadcast::Sender<ChangeEvent> {
        self.channels
            .lock()
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn execute(&self, query: &TableQuery) -> Result<QueryResponse> {
        self.log.lock().push(query.clone());
        if self.failures.read().iter().any(|rule| rule(query)) {
            bail!("simulated failure on '{}'", query.table);
        }

        let items = parse_select(&query.select)?;
        let tables = self.tables.read();
        let links = self.links.read();
        let ctx = EmbedContext {
            tables: &tables,
            links: &links,
        };

        let mut matched: Vec<(&Row, Row)> = Vec::new();
        for row in tables.get(&query.table).into_iter().flatten() {
            let Some(projected) = ctx.project(&query.table, row, &items) else {
                continue;
            };
            let visible = query.predicates.iter().all(|predicate| {
                let value = if predicate.is_nested() {
                    lookup_path(&projected, predicate.column())
                } else {
                    row.get(predicate.column()).cloned().unwrap_or(Value::Null)
                };
                predicate.test(&value)
            });
            if visible {
                matched.push((row, projected));
            }
        }

        for sort in query.order.iter().rev() {
            matched.sort_by(|(a, _), (b, _)| {
                let ordering = compare_nullable(a.get(&sort.column), b.get(&sort.column));
                if sort.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        let total = matched.len() as u64;
        let count = match query.count {
            CountMode::None => None,
            CountMode::Exact | CountMode::Head => Some(total),
        };
        if query.is_head() {
            return Ok(QueryResponse {
                rows: Vec::new(),
                count,
            });
        }

        let projected = matched.into_iter().map(|(_, projected)| projected);
        let rows: Vec<Row> = match query.range {
            Some(range) => projected.skip(range.offset).take(range.limit).collect(),
            None => projected.collect(),
        };
        Ok(QueryResponse { rows, count })
    }

    fn export(&self, params: Value) -> Result<Value> {
        let raw = params
            .get("query")
            .cloned()
            .ok_or_else(|| anyhow!("export requires a query"))?;
        let mut query: TableQuery = serde_json::from_value(raw)?;
        query.range = None;
        query.count = CountMode::None;
        let response = self.execute(&query)?;
        Ok(Value::Array(
            response.rows.into_iter().map(Value::Object).collect(),
        ))
    }
}

#[async_trait]
impl QueryService for InMemoryBackend {
    async fn select(&self, query: &TableQuery) -> Result<QueryResponse> {
        self.execute(query)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row> {
        row.entry(DEFAULT_PRIMARY_KEY)
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at")
            .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));

        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.emit(ChangeEvent::inserted(table, row.clone()));
        Ok(row)
    }

    async fn update(&self, table: &str, primary_key: &str, id: &Value, patch: Row) -> Result<Row> {
        let updated = {
            let mut tables = self.tables.write();
            let row = tables
                .get_mut(table)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|row| row.get(primary_key).is_some_and(|v| values_equal(v, id)))
                })
                .ok_or_else(|| anyhow!("no row in '{table}' with {primary_key} = {id}"))?;
            for (column, value) in patch {
                row.insert(column, value);
            }
            row.clone()
        };
        self.emit(ChangeEvent::updated(table, updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, table: &str, primary_key: &str, id: &Value) -> Result<()> {
        let removed = {
            let mut tables = self.tables.write();
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| anyhow!("unknown table '{table}'"))?;
            let index = rows
                .iter()
                .position(|row| row.get(primary_key).is_some_and(|v| values_equal(v, id)))
                .ok_or_else(|| anyhow!("no row in '{table}' with {primary_key} = {id}"))?;
            rows.remove(index)
        };
        self.emit(ChangeEvent::deleted(table, removed));
        Ok(())
    }

    async fn rpc(&self, name: &str, params: Value) -> Result<Value> {
        let custom = match self.procedures.read().get(name) {
            Some(Procedure::Export) => None,
            Some(Procedure::Custom(handler)) => Some(handler.clone()),
            None => bail!("unknown procedure '{name}'"),
        };
        match custom {
            Some(handler) => handler(params),
            None => self.export(params),
        }
    }

    async fn subscribe(&self, table: &str) -> Result<ChangeStream> {
        let receiver = self.sender(table).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!(error = %e, "change subscriber lagged");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

// ===== Select expression =====

#[derive(Debug, Clone, PartialEq)]
enum SelectItem {
    All,
    Column(String),
    Embed {
        alias: Option<String>,
        table: String,
        /// Foreign key column named in the expression
        hint: Option<String>,
        inner: bool,
        items: Vec<SelectItem>,
    },
}

fn parse_select(expression: &str) -> Result<Vec<SelectItem>> {
    split_top_level(expression)?
        .into_iter()
        .map(parse_item)
        .collect()
}

fn parse_item(token: &str) -> Result<SelectItem> {
    if token == "*" {
        return Ok(SelectItem::All);
    }
    let Some(open) = token.find('(') else {
        return Ok(SelectItem::Column(token.to_string()));
    };
    let body = token[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| anyhow!("unbalanced embed '{token}'"))?;
    let head = &token[..open];
    let (alias, target) = match head.split_once(':') {
        Some((alias, target)) => (Some(alias.trim().to_string()), target),
        None => (None, head),
    };
    // table[!fk_column][!inner]
    let mut modifiers = target.split('!').map(str::trim);
    let table = modifiers.next().unwrap_or_default();
    let mut hint = None;
    let mut inner = false;
    for modifier in modifiers {
        if modifier == "inner" {
            inner = true;
        } else {
            hint = Some(modifier.to_string());
        }
    }
    Ok(SelectItem::Embed {
        alias,
        table: table.to_string(),
        hint,
        inner,
        items: parse_select(body)?,
    })
}

fn split_top_level(expression: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    for (index, ch) in expression.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(expression[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
        if depth < 0 {
            bail!("unbalanced select expression '{expression}'");
        }
    }
    if depth != 0 {
        bail!("unbalanced select expression '{expression}'");
    }
    parts.push(expression[start..].trim());
    Ok(parts.into_iter().filter(|part| !part.is_empty()).collect())
}

struct EmbedContext<'a> {
    tables: &'a HashMap<String, Vec<Row>>,
    links: &'a HashMap<(String, String), String>,
}

impl EmbedContext<'_> {
    /// Projected row, or `None` when an inner embed has no match
    fn project(&self, table: &str, row: &Row, items: &[SelectItem]) -> Option<Row> {
        let mut out = Row::new();
        for item in items {
            match item {
                SelectItem::All => {
                    out.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                SelectItem::Column(column) => {
                    out.insert(column.clone(), row.get(column).cloned().unwrap_or(Value::Null));
                }
                SelectItem::Embed {
                    alias,
                    table: embedded,
                    hint,
                    inner,
                    items,
                } => {
                    let related = self
                        .foreign_key(table, embedded, hint.as_deref())
                        .and_then(|fk| row.get(&fk))
                        .and_then(|id| self.find(embedded, id))
                        .and_then(|related| self.project(embedded, related, items));
                    let key = alias.clone().unwrap_or_else(|| embedded.clone());
                    match related {
                        Some(related) => {
                            out.insert(key, Value::Object(related));
                        }
                        None if *inner => return None,
                        None => {
                            out.insert(key, Value::Null);
                        }
                    }
                }
            }
        }
        Some(out)
    }

    fn foreign_key(&self, table: &str, embedded: &str, hint: Option<&str>) -> Option<String> {
        if let Some(hint) = hint {
            return Some(hint.to_string());
        }
        if let Some(fk) = self.links.get(&(table.to_string(), embedded.to_string())) {
            return Some(fk.clone());
        }
        OrgLevel::from_table(embedded).map(|level| level.foreign_key().to_string())
    }

    fn find(&self, table: &str, id: &Value) -> Option<&Row> {
        self.tables.get(table)?.iter().find(|row| {
            row.get(DEFAULT_PRIMARY_KEY)
                .is_some_and(|pk| values_equal(pk, id))
        })
    }
}

fn lookup_path(row: &Row, path: &str) -> Value {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Value::Null;
    };
    let mut current = row.get(first);
    for segment in segments {
        current = current.and_then(|value| value.get(segment));
    }
    current.cloned().unwrap_or(Value::Null)
}

/// Nulls sort last in ascending order
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SortSpec;
    use serde_json::json;

    fn hierarchy() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.seed("areas", [json!({"id": "a1", "name": "North", "sector_id": "s1"})]);
        backend.seed(
            "branches",
            [
                json!({"id": "b1", "name": "Main", "area_id": "a1"}),
                json!({"id": "b2", "name": "Orphan", "area_id": "missing"}),
            ],
        );
        backend.seed(
            "tickets",
            [
                json!({"id": "t1", "branch_id": "b1", "status": "open", "created_at": "2024-01-02"}),
                json!({"id": "t2", "branch_id": "b1", "status": "closed", "created_at": "2024-01-03"}),
                json!({"id": "t3", "branch_id": "b2", "status": "open", "created_at": "2024-01-01"}),
            ],
        );
        backend
    }

    #[test]
    fn select_parser_reads_aliases_hints_and_inner_joins() {
        let items = parse_select("*, assignee:profiles!assigned_to(full_name), branches!inner(id, areas!inner(id))")
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[1],
            SelectItem::Embed {
                alias: Some("assignee".to_string()),
                table: "profiles".to_string(),
                hint: Some("assigned_to".to_string()),
                inner: false,
                items: vec![SelectItem::Column("full_name".to_string())],
            }
        );
        assert!(matches!(&items[2], SelectItem::Embed { inner: true, items, .. } if items.len() == 2));
        assert!(parse_select("branches!inner(id").is_err());
    }

    #[tokio::test]
    async fn named_join_column_overrides_the_hierarchy_default() {
        let backend = hierarchy();
        backend.seed(
            "branch_documents",
            [
                json!({"id": "d1", "site_id": "b1", "branch_id": "b2"}),
                json!({"id": "d2", "site_id": "b2", "branch_id": "b1"}),
            ],
        );
        let query = TableQuery::new("branch_documents")
            .select("*, branches!site_id!inner(id, area_id, areas!inner(id))")
            .eq("branches.area_id", "a1");

        let response = backend.select(&query).await.unwrap();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.rows[0]["id"], json!("d1"));
        assert_eq!(response.rows[0]["branches"]["id"], json!("b1"));
    }

    #[tokio::test]
    async fn inner_embeds_drop_broken_chains_and_nested_filters_apply() {
        let backend = hierarchy();
        let query = TableQuery::new("tickets")
            .select("*, branches!inner(id, area_id, areas!inner(id, sector_id))")
            .eq("branches.areas.sector_id", "s1")
            .order_by(SortSpec::desc("created_at"));

        let response = backend.select(&query).await.unwrap();
        let ids: Vec<_> = response.rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("t2"), json!("t1")]);
        assert_eq!(response.rows[0]["branches"]["areas"]["id"], json!("a1"));
    }

    #[tokio::test]
    async fn head_counts_without_rows_and_windows_page() {
        let backend = hierarchy();
        let count = backend
            .select(&TableQuery::new("tickets").eq("status", "open").head())
            .await
            .unwrap();
        assert_eq!(count.count, Some(2));
        assert!(count.rows.is_empty());

        let page = backend
            .select(&TableQuery::new("tickets").order_by(SortSpec::asc("created_at")).window(1, 1))
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0]["id"], json!("t1"));
    }

    #[tokio::test]
    async fn failure_rules_fail_matching_selects() {
        let backend = hierarchy();
        backend.fail_when(|query| query.is_head());
        assert!(backend.select(&TableQuery::new("tickets").head()).await.is_err());
        assert!(backend.select(&TableQuery::new("tickets")).await.is_ok());
        assert_eq!(backend.queries().len(), 2);
    }

    #[tokio::test]
    async fn writes_publish_change_events() {
        let backend = hierarchy();
        let mut events = backend.subscribe("tickets").await.unwrap();

        let mut row = Row::new();
        row.insert("status".to_string(), json!("open"));
        let inserted = backend.insert("tickets", row).await.unwrap();
        assert!(inserted.contains_key("id"));

        let event = events.next().await.unwrap();
        assert!(matches!(event, ChangeEvent::Inserted(_)));
        assert_eq!(event.change().row["id"], inserted["id"]);

        backend.delete("tickets", "id", &inserted["id"]).await.unwrap();
        assert!(matches!(events.next().await.unwrap(), ChangeEvent::Deleted(_)));
    }

    #[tokio::test]
    async fn export_procedure_runs_the_query_unwindowed() {
        let backend = hierarchy().with_export_rpc("export_entity_rows");
        let query = TableQuery::new("tickets").eq("status", "open").window(0, 1);
        let result = backend
            .rpc(
                "export_entity_rows",
                json!({"query": serde_json::to_value(&query).unwrap()}),
            )
            .await
            .unwrap();
        assert_eq!(result.as_array().map(Vec::len), Some(2));
        assert!(backend.rpc("missing", json!({})).await.is_err());
    }
}

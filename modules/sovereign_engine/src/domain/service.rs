//! Domain service - stateless query orchestration
//!
//! Resolves schemas through the cache, composes scoped queries and executes
//! them against the backend port. Holds no per-view state; the data
//! controller layers pagination, filters and realtime patching on top.

use super::cache::SchemaCache;
use super::events::ChangeEvent;
use super::filters::apply_filters;
use super::query::TableQuery;
use super::rbac::RbacFilter;
use super::registry::EntityRegistry;
use super::repository::{ChangeStream, QueryService};
use crate::config::Config;
use crate::contract::{
    CallerProfile, EngineError, EntitySchema, ExportOutcome, FilterSet, MetricDef, Row,
    SOFT_DELETE_COLUMN,
};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Domain service for registered entities
pub struct Service {
    registry: Arc<EntityRegistry>,
    rbac: RbacFilter,
    cache: SchemaCache,
    backend: Arc<dyn QueryService>,
    config: Config,
}

impl Service {
    pub fn new(
        registry: Arc<EntityRegistry>,
        backend: Arc<dyn QueryService>,
        cache: SchemaCache,
        config: Config,
    ) -> Self {
        Self {
            rbac: RbacFilter::new(registry.clone(), &config),
            registry,
            cache,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn rbac(&self) -> &RbacFilter {
        &self.rbac
    }

    // ===== Schema =====

    /// Resolve a schema through the cache.
    ///
    /// The registry stays authoritative: a cached entry that differs from the
    /// registered schema is replaced and never used for scoping.
    pub fn resolve_schema(&self, entity: &str) -> Result<Arc<EntitySchema>, EngineError> {
        let registered = self.registry.resolve(entity)?;
        match self.cache.get(entity) {
            Some(cached) if cached == *registered => {}
            Some(_) => {
                tracing::warn!(entity, "cached schema differs from the registry, replacing it");
                self.cache.put(entity, &registered);
            }
            None => self.cache.put(entity, &registered),
        }
        Ok(registered)
    }

    // ===== Reads =====

    /// Select expression, soft-delete exclusion, client filters, then RBAC
    pub fn scoped_query(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
        filters: &FilterSet,
    ) -> Result<TableQuery, EngineError> {
        let query = apply_filters(base_query(schema), filters);
        self.rbac.narrow(query, schema, caller)
    }

    /// Count rows visible to the caller.
    ///
    /// When the scoped count fails on a joined entity, retries once with a
    /// join-free count restricted only by soft-delete.
    pub async fn count(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
        filters: &FilterSet,
    ) -> Result<u64, EngineError> {
        let query = self.scoped_query(schema, caller, filters)?.head();
        let err = match self.backend.select(&query).await {
            Ok(response) => return Ok(response.count.unwrap_or(0)),
            Err(e) => e,
        };
        if !schema.has_joins() {
            return Err(EngineError::backend(err));
        }

        tracing::warn!(
            entity = %schema.key,
            error = %err,
            "scoped count failed, falling back to join-free count"
        );
        let mut fallback = TableQuery::new(&schema.target_table);
        if schema.supports_soft_delete {
            fallback = fallback.eq(SOFT_DELETE_COLUMN, false);
        }
        let response = self
            .backend
            .select(&fallback.head())
            .await
            .map_err(EngineError::backend)?;
        Ok(response.count.unwrap_or(0))
    }

    /// One page of rows in the schema's effective sort order
    pub async fn fetch_page(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
        filters: &FilterSet,
        page: usize,
    ) -> Result<Vec<Row>, EngineError> {
        let query = self.page_query(schema, caller, filters, page)?;
        let response = self.backend.select(&query).await.map_err(EngineError::backend)?;
        Ok(response.rows)
    }

    pub fn page_query(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
        filters: &FilterSet,
        page: usize,
    ) -> Result<TableQuery, EngineError> {
        let size = self.config.page_size;
        Ok(self
            .scoped_query(schema, caller, filters)?
            .order_by(schema.effective_sort())
            .window(page.saturating_mul(size), size))
    }

    /// Evaluate every declared metric concurrently; a failed metric reads as zero
    pub async fn metric_counts(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
    ) -> BTreeMap<String, u64> {
        let pending = schema
            .metrics
            .iter()
            .map(|metric| async move { (metric.key.clone(), self.metric(schema, caller, metric).await) });

        join_all(pending)
            .await
            .into_iter()
            .map(|(key, outcome)| {
                let value = settle(outcome, 0, &schema.key, "metric");
                (key, value)
            })
            .collect()
    }

    async fn metric(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
        metric: &MetricDef,
    ) -> Result<u64, EngineError> {
        let query = self.scoped_query(schema, caller, &metric.filter)?.head();
        let response = self.backend.select(&query).await.map_err(EngineError::backend)?;
        Ok(response.count.unwrap_or(0))
    }

    /// Bulk export through the server-side procedure.
    ///
    /// Refused without touching the backend when `total_count` is above the ceiling.
    pub async fn export(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
        filters: &FilterSet,
        total_count: u64,
    ) -> Result<ExportOutcome, EngineError> {
        let ceiling = self.config.export_ceiling;
        if total_count > ceiling {
            tracing::warn!(
                entity = %schema.key,
                total_count,
                ceiling,
                "export refused, matching rows exceed the ceiling"
            );
            return Ok(ExportOutcome::TooLarge {
                total_count,
                ceiling,
            });
        }

        let query = self
            .scoped_query(schema, caller, filters)?
            .order_by(schema.effective_sort());
        let query = serde_json::to_value(&query).map_err(|_| EngineError::Internal)?;
        let params = json!({
            "entity": schema.key,
            "table": schema.target_table,
            "query": query,
        });

        let result = self
            .backend
            .rpc(&self.config.export_rpc, params)
            .await
            .map_err(EngineError::backend)?;
        rows_from_value(result).map(ExportOutcome::Rows)
    }

    // ===== Writes =====

    pub async fn insert(&self, schema: &EntitySchema, mut row: Row) -> Result<Row, EngineError> {
        if schema.supports_soft_delete {
            row.entry(SOFT_DELETE_COLUMN).or_insert(Value::Bool(false));
        }
        self.backend
            .insert(&schema.target_table, row)
            .await
            .map_err(EngineError::backend)
    }

    pub async fn update(
        &self,
        schema: &EntitySchema,
        id: &Value,
        patch: Row,
    ) -> Result<Row, EngineError> {
        self.backend
            .update(&schema.target_table, &schema.primary_key, id, patch)
            .await
            .map_err(EngineError::backend)
    }

    /// Soft delete when the entity supports it, hard delete otherwise
    pub async fn delete(&self, schema: &EntitySchema, id: &Value) -> Result<(), EngineError> {
        if schema.supports_soft_delete {
            let mut patch = Row::new();
            patch.insert(SOFT_DELETE_COLUMN.to_string(), Value::Bool(true));
            self.update(schema, id, patch).await?;
            return Ok(());
        }
        self.backend
            .delete(&schema.target_table, &schema.primary_key, id)
            .await
            .map_err(EngineError::backend)
    }

    // ===== Realtime =====

    pub async fn subscribe(&self, schema: &EntitySchema) -> Result<ChangeStream, EngineError> {
        self.backend
            .subscribe(&schema.target_table)
            .await
            .map_err(EngineError::backend)
    }

    /// Whether an event belongs to the entity's table
    pub fn is_relevant(schema: &EntitySchema, event: &ChangeEvent) -> bool {
        event.table() == schema.target_table
    }
}

fn base_query(schema: &EntitySchema) -> TableQuery {
    let query = TableQuery::new(&schema.target_table).select(&schema.select_expression);
    if schema.supports_soft_delete {
        query.eq(SOFT_DELETE_COLUMN, false)
    } else {
        query
    }
}

fn rows_from_value(value: Value) -> Result<Vec<Row>, EngineError> {
    let Value::Array(items) = value else {
        return Err(EngineError::backend("export procedure did not return an array"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            _ => Err(EngineError::backend("export procedure returned a non-object row")),
        })
        .collect()
}

/// Degrade a failed output to `fallback` and log it
pub(crate) fn settle<T>(outcome: Result<T, EngineError>, fallback: T, entity: &str, output: &str) -> T {
    match outcome {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(entity, output, error = %e, "request failed, using empty result");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::FilterValue;
    use crate::domain::query::Predicate;
    use crate::infra::memory::InMemoryBackend;
    use uuid::Uuid;

    fn service(backend: Arc<InMemoryBackend>) -> Service {
        Service::new(
            Arc::new(EntityRegistry::standard().unwrap()),
            backend,
            SchemaCache::disabled(),
            Config::default(),
        )
    }

    #[test]
    fn scoped_query_layers_rbac_under_client_filters() {
        let service = service(Arc::new(InMemoryBackend::new()));
        let schema = service.resolve_schema("tickets").unwrap();
        let branch = Uuid::new_v4();
        let caller = CallerProfile::new(Uuid::new_v4(), "manager").with_branch(branch);
        let mut filters = FilterSet::new();
        filters.insert("status".to_string(), FilterValue::equals("open"));

        let query = service.scoped_query(&schema, Some(&caller), &filters).unwrap();
        assert_eq!(query.table, "tickets");
        assert_eq!(query.select, schema.select_expression);
        assert_eq!(
            query.predicates,
            vec![
                Predicate::Eq {
                    column: "is_deleted".to_string(),
                    value: json!(false)
                },
                Predicate::Eq {
                    column: "status".to_string(),
                    value: json!("open")
                },
                Predicate::Eq {
                    column: "branch_id".to_string(),
                    value: json!(branch.to_string())
                },
            ]
        );
    }

    #[test]
    fn page_query_orders_and_windows() {
        let service = service(Arc::new(InMemoryBackend::new()));
        let schema = service.resolve_schema("tickets").unwrap();
        let query = service
            .page_query(&schema, None, &FilterSet::new(), 2)
            .unwrap();
        assert_eq!(query.order, vec![crate::contract::SortSpec::desc("created_at")]);
        assert_eq!(
            query.range,
            Some(crate::domain::query::PageRange {
                offset: 100,
                limit: 50
            })
        );
    }

    #[tokio::test]
    async fn export_above_ceiling_never_reaches_the_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let service = service(backend.clone());
        let schema = service.resolve_schema("tickets").unwrap();

        let outcome = service
            .export(&schema, None, &FilterSet::new(), 5001)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExportOutcome::TooLarge {
                total_count: 5001,
                ceiling: 5000
            }
        );
        assert!(backend.queries().is_empty());
    }

    #[test]
    fn settle_degrades_to_fallback() {
        let value = settle(Err(EngineError::Internal), 7_u64, "tickets", "count");
        assert_eq!(value, 7);
        assert_eq!(settle(Ok(3_u64), 0, "tickets", "count"), 3);
    }

    #[test]
    fn export_rows_must_be_objects() {
        assert!(rows_from_value(json!([{"id": 1}])).is_ok());
        assert!(rows_from_value(json!([1])).is_err());
        assert!(rows_from_value(json!({"rows": []})).is_err());
    }
}

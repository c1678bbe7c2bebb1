//! Data controller for one entity view
//!
//! Owns pagination, filter and metric state for a single caller and entity.
//! Count, page and metric requests run concurrently and degrade individually;
//! only an unknown entity fails a load. A realtime subscription patches the
//! held page optimistically and schedules one debounced reconciliation.

use super::events::{patch_page, ChangeEvent};
use super::query::TableQuery;
use super::repository::ChangeStream;
use super::service::{settle, Service};
use crate::contract::{
    CallerProfile, EngineError, EntitySchema, ExportOutcome, FilterSet, PagedResult, Row,
};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Result of an initial load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub schema: Arc<EntitySchema>,
    pub page: PagedResult,
    pub metrics: BTreeMap<String, u64>,
}

#[derive(Default)]
struct ControllerState {
    schema: Option<Arc<EntitySchema>>,
    page: PagedResult,
    filters: FilterSet,
    metrics: BTreeMap<String, u64>,
    /// Query behind the held page, used to vet optimistic inserts
    page_query: Option<TableQuery>,
}

struct ControllerInner {
    entity: String,
    caller: Option<CallerProfile>,
    service: Arc<Service>,
    state: RwLock<ControllerState>,
    /// Bumped by every state-replacing fetch; older responses are dropped
    generation: AtomicU64,
}

struct Subscription {
    table: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct DataController {
    inner: Arc<ControllerInner>,
    subscription: Mutex<Option<Subscription>>,
}

impl DataController {
    pub fn new(service: Arc<Service>, entity: impl Into<String>, caller: Option<CallerProfile>) -> Self {
        let page_size = service.config().page_size;
        Self {
            inner: Arc::new(ControllerInner {
                entity: entity.into(),
                caller,
                service,
                state: RwLock::new(ControllerState {
                    page: PagedResult::empty(page_size),
                    ..ControllerState::default()
                }),
                generation: AtomicU64::new(0),
            }),
            subscription: Mutex::new(None),
        }
    }

    pub fn entity(&self) -> &str {
        &self.inner.entity
    }

    /// Resolve the schema, then fetch count, page 0 and metrics concurrently
    pub async fn load(&self) -> Result<LoadOutcome, EngineError> {
        self.inner.load().await
    }

    /// Move to page `index`. Out-of-range indices are no-ops and return `false`.
    pub async fn go_to_page(&self, index: i64) -> Result<bool, EngineError> {
        self.inner.go_to_page(index).await
    }

    /// Replace the filter set and reload from page 0
    pub async fn set_filters(&self, filters: FilterSet) -> Result<(), EngineError> {
        self.inner.set_filters(filters).await
    }

    /// Parse raw client filters, then `set_filters`
    pub async fn set_filters_json(&self, raw: Value) -> Result<(), EngineError> {
        let filters = super::filters::parse_filters(raw)?;
        self.set_filters(filters).await
    }

    /// Re-run count and the current page, keeping schema and filters
    pub async fn refresh(&self) -> Result<(), EngineError> {
        self.inner.refresh().await
    }

    /// Re-run count, metrics and the current page
    pub async fn reconcile(&self) -> Result<(), EngineError> {
        self.inner.reconcile().await
    }

    /// Bulk export of every matching row, refused above the export ceiling
    pub async fn fetch_all(&self) -> Result<ExportOutcome, EngineError> {
        self.inner.fetch_all().await
    }

    /// Writes require a caller profile
    pub async fn insert_row(&self, row: Row) -> Result<Row, EngineError> {
        self.inner.require_caller()?;
        let schema = self.inner.schema()?;
        let inserted = self.inner.service.insert(&schema, row).await?;
        self.refresh().await?;
        Ok(inserted)
    }

    pub async fn update_row(&self, id: &Value, patch: Row) -> Result<Row, EngineError> {
        self.inner.require_caller()?;
        let schema = self.inner.schema()?;
        let updated = self.inner.service.update(&schema, id, patch).await?;
        self.refresh().await?;
        Ok(updated)
    }

    pub async fn delete_row(&self, id: &Value) -> Result<(), EngineError> {
        self.inner.require_caller()?;
        let schema = self.inner.schema()?;
        self.inner.service.delete(&schema, id).await?;
        self.refresh().await
    }

    // ===== Realtime =====

    /// Listen to change events of the entity's target table.
    ///
    /// Idempotent: a second call while subscribed is a no-op. The subscription
    /// is independent of page and filter state.
    pub async fn subscribe(&self) -> Result<(), EngineError> {
        let schema = self.inner.schema()?;
        let active = self
            .subscription
            .lock()
            .as_ref()
            .is_some_and(|s| s.table == schema.target_table && !s.task.is_finished());
        if active {
            return Ok(());
        }

        let stream = self.inner.service.subscribe(&schema).await?;
        let cancel = CancellationToken::new();
        let debounce = self.inner.service.config().refresh_debounce;
        let task = tokio::spawn(listen(self.inner.clone(), stream, cancel.clone(), debounce));

        let previous = self.subscription.lock().replace(Subscription {
            table: schema.target_table.clone(),
            cancel,
            task,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        tracing::info!(entity = %self.inner.entity, table = %schema.target_table, "subscribed to changes");
        Ok(())
    }

    pub fn unsubscribe(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel.cancel();
            tracing::info!(entity = %self.inner.entity, table = %subscription.table, "unsubscribed from changes");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    // ===== Snapshots =====

    pub fn schema(&self) -> Option<Arc<EntitySchema>> {
        self.inner.state.read().schema.clone()
    }

    pub fn page(&self) -> PagedResult {
        self.inner.state.read().page.clone()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.inner.state.read().page.rows.clone()
    }

    pub fn current_page(&self) -> usize {
        self.inner.state.read().page.page
    }

    pub fn total_count(&self) -> u64 {
        self.inner.state.read().page.total_count
    }

    pub fn total_pages(&self) -> usize {
        self.inner.state.read().page.total_pages()
    }

    pub fn filters(&self) -> FilterSet {
        self.inner.state.read().filters.clone()
    }

    pub fn metrics(&self) -> BTreeMap<String, u64> {
        self.inner.state.read().metrics.clone()
    }
}

impl Drop for DataController {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.cancel.cancel();
        }
    }
}

impl ControllerInner {
    fn caller(&self) -> Option<&CallerProfile> {
        self.caller.as_ref()
    }

    fn require_caller(&self) -> Result<&CallerProfile, EngineError> {
        self.caller.as_ref().ok_or(EngineError::Unauthenticated)
    }

    fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn schema(&self) -> Result<Arc<EntitySchema>, EngineError> {
        if let Some(schema) = self.state.read().schema.clone() {
            return Ok(schema);
        }
        let schema = self.service.resolve_schema(&self.entity)?;
        self.state.write().schema = Some(schema.clone());
        Ok(schema)
    }

    async fn load(&self) -> Result<LoadOutcome, EngineError> {
        let schema = self.service.resolve_schema(&self.entity)?;
        let generation = self.begin();
        let page_size = self.service.config().page_size;
        let filters = {
            let mut state = self.state.write();
            state.schema = Some(schema.clone());
            state.filters.clone()
        };

        if self.caller.is_none() {
            // no profile, no rows
            let mut state = self.state.write();
            state.page = PagedResult::empty(page_size);
            state.metrics = BTreeMap::new();
            state.page_query = None;
            return Ok(LoadOutcome {
                schema,
                page: state.page.clone(),
                metrics: BTreeMap::new(),
            });
        }

        let (count, rows, metrics) = tokio::join!(
            self.service.count(&schema, self.caller(), &filters),
            self.service.fetch_page(&schema, self.caller(), &filters, 0),
            self.service.metric_counts(&schema, self.caller()),
        );
        let page = PagedResult {
            rows: settle(rows, Vec::new(), &self.entity, "page"),
            page: 0,
            page_size,
            total_count: settle(count, 0, &self.entity, "count"),
        };

        if self.is_current(generation) {
            let mut state = self.state.write();
            state.page = page.clone();
            state.metrics = metrics.clone();
            state.page_query = self.service.page_query(&schema, self.caller(), &filters, 0).ok();
        } else {
            tracing::debug!(entity = %self.entity, "discarding superseded load");
        }

        Ok(LoadOutcome {
            schema,
            page,
            metrics,
        })
    }

    async fn go_to_page(&self, index: i64) -> Result<bool, EngineError> {
        let schema = self.schema()?;
        let (total_pages, filters) = {
            let state = self.state.read();
            (state.page.total_pages(), state.filters.clone())
        };
        let target = match usize::try_from(index) {
            Ok(target) if target < total_pages => target,
            _ => {
                tracing::debug!(entity = %self.entity, index, total_pages, "page out of range");
                return Ok(false);
            }
        };
        if self.caller.is_none() {
            return Ok(false);
        }

        // a refresh started while this fetch is pending reloads the new page
        let generation = self.begin();
        self.state.write().page.page = target;
        let rows = self
            .service
            .fetch_page(&schema, self.caller(), &filters, target)
            .await;
        let rows = settle(rows, Vec::new(), &self.entity, "page");

        if self.is_current(generation) {
            let mut state = self.state.write();
            state.page.rows = rows;
            state.page_query = self.service.page_query(&schema, self.caller(), &filters, target).ok();
        } else {
            tracing::debug!(entity = %self.entity, page = target, "discarding superseded page fetch");
        }
        Ok(true)
    }

    async fn set_filters(&self, filters: FilterSet) -> Result<(), EngineError> {
        {
            let mut state = self.state.write();
            state.filters = filters;
            state.page.page = 0;
        }
        self.fetch(false).await
    }

    async fn refresh(&self) -> Result<(), EngineError> {
        self.fetch(false).await
    }

    async fn reconcile(&self) -> Result<(), EngineError> {
        self.fetch(true).await
    }

    /// Count plus the held page, optionally metrics too
    async fn fetch(&self, with_metrics: bool) -> Result<(), EngineError> {
        let schema = self.schema()?;
        if self.caller.is_none() {
            return Ok(());
        }
        let generation = self.begin();
        let (filters, page) = {
            let state = self.state.read();
            (state.filters.clone(), state.page.page)
        };

        let metrics = async {
            if with_metrics {
                Some(self.service.metric_counts(&schema, self.caller()).await)
            } else {
                None
            }
        };
        let (count, rows, metrics) = tokio::join!(
            self.service.count(&schema, self.caller(), &filters),
            self.service.fetch_page(&schema, self.caller(), &filters, page),
            metrics,
        );

        if !self.is_current(generation) {
            tracing::debug!(entity = %self.entity, "discarding superseded refresh");
            return Ok(());
        }
        let mut state = self.state.write();
        state.page.rows = settle(rows, Vec::new(), &self.entity, "page");
        state.page.total_count = settle(count, 0, &self.entity, "count");
        state.page_query = self.service.page_query(&schema, self.caller(), &filters, page).ok();
        if let Some(metrics) = metrics {
            state.metrics = metrics;
        }
        Ok(())
    }

    async fn fetch_all(&self) -> Result<ExportOutcome, EngineError> {
        let schema = self.schema()?;
        if self.caller.is_none() {
            return Ok(ExportOutcome::Rows(Vec::new()));
        }
        let filters = self.state.read().filters.clone();

        // the held total may be stale or a degraded zero
        let total_count = match self.service.count(&schema, self.caller(), &filters).await {
            Ok(total_count) => total_count,
            Err(e) => {
                tracing::warn!(entity = %self.entity, error = %e, "export refused, matching rows could not be counted");
                return Ok(ExportOutcome::Uncounted);
            }
        };

        let outcome = self
            .service
            .export(&schema, self.caller(), &filters, total_count)
            .await;
        Ok(settle(outcome, ExportOutcome::Rows(Vec::new()), &self.entity, "export"))
    }

    /// Optimistically patch the held page
    fn apply_event(&self, event: &ChangeEvent) {
        let mut state = self.state.write();
        let Some(schema) = state.schema.clone() else {
            return;
        };
        if !Service::is_relevant(&schema, event) {
            return;
        }
        if let ChangeEvent::Inserted(change) = event {
            // rows the held query provably excludes are left to reconciliation
            let excluded = state.page_query.as_ref().is_some_and(|query| {
                query
                    .predicates
                    .iter()
                    .any(|p| p.matches(&change.row) == Some(false))
            });
            if excluded {
                tracing::debug!(entity = %self.entity, "insert outside the held query, skipping patch");
                return;
            }
        }
        patch_page(
            &mut state.page,
            event,
            &schema.primary_key,
            schema.supports_soft_delete,
        );
    }
}

async fn listen(
    inner: Arc<ControllerInner>,
    mut stream: ChangeStream,
    cancel: CancellationToken,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => match event {
                Some(event) => {
                    inner.apply_event(&event);
                    deadline = Some(Instant::now() + debounce);
                }
                None => {
                    if deadline.take().is_some() {
                        reconcile_logged(&inner).await;
                    }
                    tracing::info!(entity = %inner.entity, "change stream closed");
                    break;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                reconcile_logged(&inner).await;
            }
        }
    }
}

async fn reconcile_logged(inner: &ControllerInner) {
    if let Err(e) = inner.reconcile().await {
        tracing::warn!(entity = %inner.entity, error = %e, "reconciliation failed");
    }
}

//! Native client implementation - wraps the domain service for in-process calls

use crate::contract::{
    CallerProfile, EngineError, EntitySchema, ExportOutcome, FilterSet, PagedResult, Row,
    TableEngineApi,
};
use crate::domain::Service;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Native client that calls the domain service directly
///
/// Unlike the data controller it keeps no state between calls and surfaces
/// backend failures as errors instead of degrading them.
#[derive(Clone)]
pub struct NativeClient {
    service: Arc<Service>,
}

impl NativeClient {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TableEngineApi for NativeClient {
    async fn schema(&self, entity: &str) -> Result<Arc<EntitySchema>, EngineError> {
        self.service.resolve_schema(entity)
    }

    async fn list_page(
        &self,
        entity: &str,
        caller: &CallerProfile,
        filters: &FilterSet,
        page: usize,
    ) -> Result<PagedResult, EngineError> {
        let schema = self.service.resolve_schema(entity)?;
        let (count, rows) = tokio::join!(
            self.service.count(&schema, Some(caller), filters),
            self.service.fetch_page(&schema, Some(caller), filters, page),
        );
        Ok(PagedResult {
            rows: rows?,
            page,
            page_size: self.service.config().page_size,
            total_count: count?,
        })
    }

    async fn count(
        &self,
        entity: &str,
        caller: &CallerProfile,
        filters: &FilterSet,
    ) -> Result<u64, EngineError> {
        let schema = self.service.resolve_schema(entity)?;
        self.service.count(&schema, Some(caller), filters).await
    }

    async fn metrics(
        &self,
        entity: &str,
        caller: &CallerProfile,
    ) -> Result<BTreeMap<String, u64>, EngineError> {
        let schema = self.service.resolve_schema(entity)?;
        Ok(self.service.metric_counts(&schema, Some(caller)).await)
    }

    async fn export(
        &self,
        entity: &str,
        caller: &CallerProfile,
        filters: &FilterSet,
    ) -> Result<ExportOutcome, EngineError> {
        let schema = self.service.resolve_schema(entity)?;
        let total_count = self.service.count(&schema, Some(caller), filters).await?;
        self.service
            .export(&schema, Some(caller), filters, total_count)
            .await
    }

    async fn insert(&self, entity: &str, row: Row) -> Result<Row, EngineError> {
        let schema = self.service.resolve_schema(entity)?;
        self.service.insert(&schema, row).await
    }

    async fn update(&self, entity: &str, id: &Value, patch: Row) -> Result<Row, EngineError> {
        let schema = self.service.resolve_schema(entity)?;
        self.service.update(&schema, id, patch).await
    }

    async fn delete(&self, entity: &str, id: &Value) -> Result<(), EngineError> {
        let schema = self.service.resolve_schema(entity)?;
        self.service.delete(&schema, id).await
    }
}

//! Native client trait for in-process callers
//!
//! Stateless counterpart of the data controller: every call resolves the schema,
//! applies RBAC for the given caller and executes one request.

use super::{
    error::EngineError,
    model::{CallerProfile, EntitySchema, ExportOutcome, FilterSet, PagedResult, Row},
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait TableEngineApi: Send + Sync {
    /// Resolve an entity schema (cache, then registry)
    async fn schema(&self, entity: &str) -> Result<Arc<EntitySchema>, EngineError>;

    /// Fetch one page of rows with its total count
    async fn list_page(
        &self,
        entity: &str,
        caller: &CallerProfile,
        filters: &FilterSet,
        page: usize,
    ) -> Result<PagedResult, EngineError>;

    /// Count rows visible to the caller
    async fn count(
        &self,
        entity: &str,
        caller: &CallerProfile,
        filters: &FilterSet,
    ) -> Result<u64, EngineError>;

    /// Evaluate every declared metric; failed metrics read as zero
    async fn metrics(
        &self,
        entity: &str,
        caller: &CallerProfile,
    ) -> Result<BTreeMap<String, u64>, EngineError>;

    /// Bulk export, refused above the export ceiling
    async fn export(
        &self,
        entity: &str,
        caller: &CallerProfile,
        filters: &FilterSet,
    ) -> Result<ExportOutcome, EngineError>;

    async fn insert(&self, entity: &str, row: Row) -> Result<Row, EngineError>;

    async fn update(&self, entity: &str, id: &Value, patch: Row) -> Result<Row, EngineError>;

    /// Soft delete when the entity supports it, hard delete otherwise
    async fn delete(&self, entity: &str, id: &Value) -> Result<(), EngineError>;
}

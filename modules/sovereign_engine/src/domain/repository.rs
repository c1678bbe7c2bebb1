//! Ports to the hosted backend and the session store
//!
//! The engine consumes these interfaces and never implements a backend itself.
//! In-memory adapters live in infra/memory.

use super::events::ChangeEvent;
use super::query::{QueryResponse, TableQuery};
use crate::contract::Row;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// Live feed of change events for one table
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Backend query/update service
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Execute a filtered, ordered, windowed select or a count-only request
    async fn select(&self, query: &TableQuery) -> Result<QueryResponse>;

    async fn insert(&self, table: &str, row: Row) -> Result<Row>;

    /// Merge `patch` into the row whose `primary_key` equals `id`
    async fn update(&self, table: &str, primary_key: &str, id: &Value, patch: Row) -> Result<Row>;

    async fn delete(&self, table: &str, primary_key: &str, id: &Value) -> Result<()>;

    /// Invoke a named remote procedure
    async fn rpc(&self, name: &str, params: Value) -> Result<Value>;

    /// Subscribe to insert/update/delete events of a table
    async fn subscribe(&self, table: &str) -> Result<ChangeStream>;
}

/// Session-scoped string key-value store backing the schema cache
///
/// Writes may fail (quota exceeded); callers treat every failure as a cache miss.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

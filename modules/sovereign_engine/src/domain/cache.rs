//! Short-TTL schema cache over the session key-value store
//!
//! Entries expire lazily: a read older than the TTL is a miss and evicts the entry.
//! Store failures are swallowed, so the engine behaves the same with caching off.

use super::repository::KeyValueStore;
use crate::contract::EntitySchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCacheEntry {
    pub schema: EntitySchema,
    pub cached_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SchemaCache {
    store: Option<Arc<dyn KeyValueStore>>,
    ttl: chrono::Duration,
    prefix: String,
}

impl SchemaCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, prefix: impl Into<String>) -> Self {
        Self {
            store: Some(store),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            prefix: prefix.into(),
        }
    }

    /// Cache that never hits
    pub fn disabled() -> Self {
        Self {
            store: None,
            ttl: chrono::Duration::zero(),
            prefix: String::new(),
        }
    }

    pub fn get(&self, entity: &str) -> Option<EntitySchema> {
        self.get_at(entity, Utc::now())
    }

    pub fn get_at(&self, entity: &str, now: DateTime<Utc>) -> Option<EntitySchema> {
        let store = self.store.as_ref()?;
        let key = self.key(entity);

        let raw = match store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(entity, error = %e, "schema cache read failed");
                return None;
            }
        };

        let entry: SchemaCacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(entity, error = %e, "discarding unreadable schema cache entry");
                self.evict(store.as_ref(), &key);
                return None;
            }
        };

        if now - entry.cached_at > self.ttl {
            tracing::debug!(entity, "schema cache entry expired");
            self.evict(store.as_ref(), &key);
            return None;
        }

        tracing::debug!(entity, "schema cache hit");
        Some(entry.schema)
    }

    pub fn put(&self, entity: &str, schema: &EntitySchema) {
        self.put_at(entity, schema, Utc::now());
    }

    pub fn put_at(&self, entity: &str, schema: &EntitySchema, now: DateTime<Utc>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let entry = SchemaCacheEntry {
            schema: schema.clone(),
            cached_at: now,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(entity, error = %e, "schema cache entry not serializable");
                return;
            }
        };
        if let Err(e) = store.set(&self.key(entity), &raw) {
            tracing::debug!(entity, error = %e, "schema cache write failed");
        }
    }

    pub fn invalidate(&self, entity: &str) {
        if let Some(store) = self.store.as_ref() {
            self.evict(store.as_ref(), &self.key(entity));
        }
    }

    fn evict(&self, store: &dyn KeyValueStore, key: &str) {
        if let Err(e) = store.remove(key) {
            tracing::debug!(key, error = %e, "schema cache eviction failed");
        }
    }

    fn key(&self, entity: &str) -> String {
        format!("{}{}", self.prefix, entity)
    }
}

//! Engine bootstrap and lifecycle

use crate::api::native::NativeClient;
use crate::config::Config;
use crate::contract::{CallerProfile, EngineError, TableEngineApi};
use crate::domain::{
    AuditReport, DataController, EntityRegistry, KeyValueStore, QueryService, SchemaCache, Service,
};
use anyhow::Result;
use std::sync::Arc;

/// Wires configuration, registry, schema cache and backend into one engine
pub struct SovereignEngine {
    service: Arc<Service>,
    client: Arc<NativeClient>,
}

impl SovereignEngine {
    pub fn new(
        config: Config,
        registry: EntityRegistry,
        backend: Arc<dyn QueryService>,
        session_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let cache = if config.schema_cache_enabled {
            SchemaCache::new(
                session_store,
                config.schema_cache_ttl,
                config.cache_key_prefix.clone(),
            )
        } else {
            SchemaCache::disabled()
        };

        let report = registry.audit();
        for issue in &report.issues {
            tracing::warn!(entity = %issue.entity(), issue = %issue, "registry configuration issue");
        }

        let service = Arc::new(Service::new(Arc::new(registry), backend, cache, config));
        let client = Arc::new(NativeClient::new(service.clone()));

        tracing::info!(
            entities = report.entities_checked,
            issues = report.issues.len(),
            "Sovereign engine initialized"
        );
        Self { service, client }
    }

    /// Engine over the standard maintenance ERP registry
    pub fn standard(
        config: Config,
        backend: Arc<dyn QueryService>,
        session_store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let registry = EntityRegistry::standard()?;
        Ok(Self::new(config, registry, backend, session_store))
    }

    /// Data controller for `entity`; unknown entities fail immediately
    pub fn controller(
        &self,
        entity: &str,
        caller: Option<CallerProfile>,
    ) -> Result<DataController, EngineError> {
        self.service.registry().resolve(entity)?;
        Ok(DataController::new(self.service.clone(), entity, caller))
    }

    pub fn client(&self) -> Arc<dyn TableEngineApi> {
        self.client.clone()
    }

    pub fn service(&self) -> Arc<Service> {
        self.service.clone()
    }

    pub fn config(&self) -> &Config {
        self.service.config()
    }

    /// Offline configuration audit of the registry
    pub fn audit(&self) -> AuditReport {
        self.service.registry().audit()
    }
}

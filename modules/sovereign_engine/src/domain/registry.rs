//! Entity registry - closed map from logical entity name to schema
//!
//! Built once at startup. Construction composes every select expression and
//! resolves every scope route; there is no runtime registration, so an
//! unknown name fails loudly instead of falling back to an empty schema.

use super::hierarchy::ScopeRoute;
use super::select::compose_select;
use super::validation::{self, AuditReport, ConfigIssue};
use crate::contract::{EngineError, EntitySchema};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid registry: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Invalid(Vec<ConfigIssue>),
}

pub struct EntityRegistry {
    entities: BTreeMap<String, Arc<EntitySchema>>,
    routes: HashMap<String, ScopeRoute>,
    /// Route problems found at build time, reported by `audit`
    route_issues: Vec<ConfigIssue>,
}

impl EntityRegistry {
    /// Build the registry from raw schemas.
    ///
    /// Duplicate keys and relationships to unregistered entities are rejected.
    /// Entities whose scope path cannot be resolved are kept and reported by
    /// `audit`; requests against them fail with a configuration error.
    pub fn build(schemas: Vec<EntitySchema>) -> Result<Self, RegistryError> {
        let mut raw: BTreeMap<String, EntitySchema> = BTreeMap::new();
        let mut structural = Vec::new();
        for schema in schemas {
            let key = schema.key.clone();
            if raw.insert(key.clone(), schema).is_some() {
                structural.push(ConfigIssue::DuplicateEntity { entity: key });
            }
        }
        for schema in raw.values() {
            structural.extend(validation::relationship_issues(schema, |key| {
                raw.contains_key(key)
            }));
        }
        if !structural.is_empty() {
            return Err(RegistryError::Invalid(structural));
        }

        let lookup = |key: &str| raw.get(key);
        let mut routes = HashMap::new();
        let mut route_issues = Vec::new();
        let mut entities = BTreeMap::new();

        for (key, schema) in &raw {
            let route = match validation::resolve_route(key, &lookup) {
                Ok(route) => route,
                Err(issue) => {
                    route_issues.push(issue);
                    None
                }
            };

            let mut composed = schema.clone();
            composed.select_expression = compose_select(schema, route.as_ref(), lookup)
                .map_err(|issue| RegistryError::Invalid(vec![issue]))?;

            if let Some(route) = route {
                routes.insert(key.clone(), route);
            }
            entities.insert(key.clone(), Arc::new(composed));
        }

        Ok(Self {
            entities,
            routes,
            route_issues,
        })
    }

    /// Registry of the maintenance ERP entities
    pub fn standard() -> Result<Self, RegistryError> {
        Self::build(super::catalog::standard_entities())
    }

    pub fn resolve(&self, entity: &str) -> Result<Arc<EntitySchema>, EngineError> {
        self.entities
            .get(entity)
            .cloned()
            .ok_or_else(|| EngineError::not_found(entity))
    }

    pub fn route(&self, entity: &str) -> Option<&ScopeRoute> {
        self.routes.get(entity)
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Configuration audit over every registered entity
    pub fn audit(&self) -> AuditReport {
        AuditReport {
            entities_checked: self.entities.len(),
            issues: self.route_issues.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{OrgLevel, RbacLevel, Relationship};

    #[test]
    fn standard_registry_is_clean() {
        let registry = EntityRegistry::standard().unwrap();
        let report = registry.audit();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.entities_checked, registry.len());
    }

    #[test]
    fn every_scoped_standard_entity_has_a_route() {
        let registry = EntityRegistry::standard().unwrap();
        for name in registry.names() {
            let schema = registry.resolve(name).unwrap();
            assert_eq!(
                schema.rbac_level != RbacLevel::Global,
                registry.route(name).is_some(),
                "{name}"
            );
        }
    }

    #[test]
    fn unknown_entity_fails_loudly() {
        let registry = EntityRegistry::standard().unwrap();
        let err = registry.resolve("invoices").unwrap_err();
        assert_eq!(err, EngineError::not_found("invoices"));
    }

    #[test]
    fn tickets_select_joins_the_branch_chain() {
        let registry = EntityRegistry::standard().unwrap();
        let tickets = registry.resolve("tickets").unwrap();
        assert!(tickets.select_expression.contains("branches!inner("));
        assert!(tickets.select_expression.contains("brands!inner(id, name)"));
        assert_eq!(registry.route("tickets").unwrap().anchor, OrgLevel::Branch);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = EntityRegistry::build(vec![
            EntitySchema::new("tickets", "tickets"),
            EntitySchema::new("tickets", "tickets_v2"),
        ])
        .err()
        .unwrap();
        assert_eq!(
            err,
            RegistryError::Invalid(vec![ConfigIssue::DuplicateEntity {
                entity: "tickets".to_string()
            }])
        );
    }

    #[test]
    fn dangling_relationships_are_rejected() {
        let result = EntityRegistry::build(vec![EntitySchema::new("tickets", "tickets")
            .relation("vendor_id", Relationship::to("vendors"))]);
        assert!(matches!(result, Err(RegistryError::Invalid(_))));
    }

    #[test]
    fn unresolvable_scope_is_kept_and_audited() {
        let mut orphan = EntitySchema::new("work_orders", "work_orders");
        orphan.direct_scope_column = None;

        let registry = EntityRegistry::build(vec![orphan]).unwrap();
        assert!(registry.contains("work_orders"));
        assert!(registry.route("work_orders").is_none());
        assert_eq!(registry.audit().issues_for("work_orders").count(), 1);
    }
}

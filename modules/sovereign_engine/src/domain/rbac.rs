//! Hierarchical RBAC filter
//!
//! Narrows a query to rows inside the caller's scope. Only the caller's most
//! specific hierarchy identifier is used. The filter is purely additive: it
//! appends one equality (or match-nothing) predicate and never removes any.

use super::hierarchy::ScopeRoute;
use super::query::{Predicate, TableQuery};
use super::registry::EntityRegistry;
use crate::config::Config;
use crate::contract::{CallerProfile, EngineError, EntitySchema, UserScope};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of scope resolution for one caller and entity
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeDecision {
    /// No constraint is added
    Unrestricted,
    /// Rows must satisfy the predicate
    Restrict(Predicate),
    /// No row is visible
    Deny,
}

pub struct RbacFilter {
    registry: Arc<EntityRegistry>,
    global_roles: HashSet<String>,
    allow_unscoped: bool,
}

impl RbacFilter {
    pub fn new(registry: Arc<EntityRegistry>, config: &Config) -> Self {
        Self {
            registry,
            global_roles: config.global_roles.iter().cloned().collect(),
            allow_unscoped: config.allow_unscoped_profiles,
        }
    }

    pub fn is_global_role(&self, role: &str) -> bool {
        self.global_roles.contains(role)
    }

    /// Narrow `query` to rows of `entity` the caller may see
    pub fn apply(
        &self,
        query: TableQuery,
        entity: &str,
        caller: Option<&CallerProfile>,
    ) -> Result<TableQuery, EngineError> {
        let schema = self.registry.resolve(entity)?;
        self.narrow(query, &schema, caller)
    }

    /// Same as `apply` for an already resolved schema
    pub fn narrow(
        &self,
        query: TableQuery,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
    ) -> Result<TableQuery, EngineError> {
        Ok(match self.decide(schema, caller)? {
            ScopeDecision::Unrestricted => query,
            ScopeDecision::Restrict(predicate) => query.filter(predicate),
            ScopeDecision::Deny => query.filter(Predicate::nothing(schema.primary_key.clone())),
        })
    }

    pub fn decide(
        &self,
        schema: &EntitySchema,
        caller: Option<&CallerProfile>,
    ) -> Result<ScopeDecision, EngineError> {
        // unauthenticated callers are turned away upstream
        let Some(caller) = caller else {
            return Ok(ScopeDecision::Unrestricted);
        };
        if self.is_global_role(&caller.role) {
            return Ok(ScopeDecision::Unrestricted);
        }
        let Some(anchor) = schema.rbac_level.anchor() else {
            return Ok(ScopeDecision::Unrestricted);
        };
        let route = self
            .registry
            .route(&schema.key)
            .ok_or_else(|| EngineError::Configuration {
                entity: schema.key.clone(),
                reason: format!("{anchor:?}-scoped entity has no scope path"),
            })?;

        let Some(scope) = UserScope::resolve(caller) else {
            if self.allow_unscoped {
                tracing::warn!(
                    entity = %schema.key,
                    caller = %caller.id,
                    "caller has no hierarchy scope, returning unfiltered rows"
                );
                return Ok(ScopeDecision::Unrestricted);
            }
            tracing::warn!(
                entity = %schema.key,
                caller = %caller.id,
                "caller has no hierarchy scope, denying access"
            );
            return Ok(ScopeDecision::Deny);
        };

        Ok(self.restrict(schema, route, caller, scope))
    }

    fn restrict(
        &self,
        schema: &EntitySchema,
        route: &ScopeRoute,
        caller: &CallerProfile,
        scope: UserScope,
    ) -> ScopeDecision {
        if let Some(column) = route.path_for(scope.level) {
            return ScopeDecision::Restrict(equals(column, scope.id));
        }

        // caller sits below the entity's anchor; use the profile's own anchor-level id
        match (caller.id_at(route.anchor), route.path_for(route.anchor)) {
            (Some(id), Some(column)) => ScopeDecision::Restrict(equals(column, id)),
            _ => {
                tracing::warn!(
                    entity = %schema.key,
                    caller = %caller.id,
                    scope = ?scope.level,
                    anchor = ?route.anchor,
                    "caller scope is finer than the entity anchor, denying access"
                );
                ScopeDecision::Deny
            }
        }
    }
}

fn equals(column: String, id: uuid::Uuid) -> Predicate {
    Predicate::Eq {
        column,
        value: Value::String(id.to_string()),
    }
}

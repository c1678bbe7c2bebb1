//! Offline registry audit
//!
//! Enumerates schemas and checks each non-global entity for a resolvable scope
//! path, so configuration errors surface before any request is made.

use super::hierarchy::{ScopeRoute, ViaHop};
use crate::contract::{EntitySchema, OrgLevel};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("'{entity}' is registered twice")]
    DuplicateEntity { entity: String },

    #[error("'{entity}' relationship '{column}' targets unregistered entity '{target}'")]
    UnknownRelationship {
        entity: String,
        column: String,
        target: String,
    },

    #[error("'{entity}' is not global but has no scope column or scope relationship")]
    MissingScopePath { entity: String },

    #[error("'{entity}' scope column '{column}' does not reference the {level:?} hierarchy")]
    UnboundScopeColumn {
        entity: String,
        column: String,
        level: OrgLevel,
    },

    #[error("'{entity}' scopes via '{column}', which is not a declared relationship")]
    UndeclaredScopeRelationship { entity: String, column: String },

    #[error("'{entity}' scopes via global entity '{target}'")]
    GlobalScopeTarget { entity: String, target: String },

    #[error("'{entity}' is gated at {expected:?} but its scope path reaches {found:?}")]
    AnchorMismatch {
        entity: String,
        expected: OrgLevel,
        found: OrgLevel,
    },

    #[error("scope path of '{entity}' loops back on itself")]
    ScopeCycle { entity: String },
}

impl ConfigIssue {
    pub fn entity(&self) -> &str {
        match self {
            Self::DuplicateEntity { entity }
            | Self::UnknownRelationship { entity, .. }
            | Self::MissingScopePath { entity }
            | Self::UnboundScopeColumn { entity, .. }
            | Self::UndeclaredScopeRelationship { entity, .. }
            | Self::GlobalScopeTarget { entity, .. }
            | Self::AnchorMismatch { entity, .. }
            | Self::ScopeCycle { entity } => entity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub entities_checked: usize,
    pub issues: Vec<ConfigIssue>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues_for<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a ConfigIssue> {
        self.issues.iter().filter(move |issue| issue.entity() == entity)
    }
}

/// Audit a set of schemas without building a registry
pub fn audit_schemas(schemas: &[EntitySchema]) -> AuditReport {
    let mut report = AuditReport {
        entities_checked: schemas.len(),
        issues: Vec::new(),
    };

    let mut by_key: BTreeMap<&str, &EntitySchema> = BTreeMap::new();
    for schema in schemas {
        if by_key.insert(schema.key.as_str(), schema).is_some() {
            report.issues.push(ConfigIssue::DuplicateEntity {
                entity: schema.key.clone(),
            });
        }
    }

    for schema in by_key.values() {
        report
            .issues
            .extend(relationship_issues(schema, |key| by_key.contains_key(key)));
        if let Err(issue) = resolve_route(&schema.key, &|key| by_key.get(key).copied()) {
            report.issues.push(issue);
        }
    }

    report
}

pub(crate) fn relationship_issues(
    schema: &EntitySchema,
    is_registered: impl Fn(&str) -> bool,
) -> Vec<ConfigIssue> {
    schema
        .relationships
        .iter()
        .filter(|(_, rel)| !is_registered(&rel.entity))
        .map(|(column, rel)| ConfigIssue::UnknownRelationship {
            entity: schema.key.clone(),
            column: column.clone(),
            target: rel.entity.clone(),
        })
        .collect()
}

/// Resolve the scope route of `entity`. `Ok(None)` for global entities.
pub(crate) fn resolve_route<'a>(
    entity: &str,
    lookup: &dyn Fn(&str) -> Option<&'a EntitySchema>,
) -> Result<Option<ScopeRoute>, ConfigIssue> {
    let mut visited = HashSet::new();
    resolve_route_inner(entity, lookup, &mut visited)
}

fn resolve_route_inner<'a>(
    entity: &str,
    lookup: &dyn Fn(&str) -> Option<&'a EntitySchema>,
    visited: &mut HashSet<String>,
) -> Result<Option<ScopeRoute>, ConfigIssue> {
    let Some(schema) = lookup(entity) else {
        return Err(ConfigIssue::MissingScopePath {
            entity: entity.to_string(),
        });
    };
    if !visited.insert(schema.key.clone()) {
        return Err(ConfigIssue::ScopeCycle {
            entity: schema.key.clone(),
        });
    }

    let Some(anchor) = schema.rbac_level.anchor() else {
        return Ok(None);
    };

    if let Some(column) = &schema.direct_scope_column {
        return direct_route(schema, column, anchor, lookup).map(Some);
    }

    let Some(via) = &schema.scope_via else {
        return Err(ConfigIssue::MissingScopePath {
            entity: schema.key.clone(),
        });
    };
    let Some(relationship) = schema.relationships.get(via) else {
        return Err(ConfigIssue::UndeclaredScopeRelationship {
            entity: schema.key.clone(),
            column: via.clone(),
        });
    };
    let Some(related) = lookup(&relationship.entity) else {
        return Err(ConfigIssue::UnknownRelationship {
            entity: schema.key.clone(),
            column: via.clone(),
            target: relationship.entity.clone(),
        });
    };

    let inner = resolve_route_inner(&related.key, lookup, visited)?.ok_or_else(|| {
        ConfigIssue::GlobalScopeTarget {
            entity: schema.key.clone(),
            target: related.key.clone(),
        }
    })?;
    if inner.anchor != anchor {
        return Err(ConfigIssue::AnchorMismatch {
            entity: schema.key.clone(),
            expected: anchor,
            found: inner.anchor,
        });
    }

    // hanging off a hierarchy table itself: bind on our own foreign key instead
    if inner.self_anchored {
        return Ok(Some(ScopeRoute {
            anchor,
            via: Vec::new(),
            column: via.clone(),
            self_anchored: false,
        }));
    }

    let mut hops = vec![ViaHop {
        link_column: via.clone(),
        table: related.target_table.clone(),
        primary_key: related.primary_key.clone(),
    }];
    hops.extend(inner.via);
    Ok(Some(ScopeRoute {
        anchor,
        via: hops,
        column: inner.column,
        self_anchored: false,
    }))
}

fn direct_route<'a>(
    schema: &EntitySchema,
    column: &str,
    anchor: OrgLevel,
    lookup: &dyn Fn(&str) -> Option<&'a EntitySchema>,
) -> Result<ScopeRoute, ConfigIssue> {
    let self_anchored =
        schema.target_table == anchor.table() && column == schema.primary_key.as_str();

    let references_anchor = column == anchor.foreign_key()
        || schema
            .relationships
            .get(column)
            .and_then(|rel| lookup(&rel.entity))
            .is_some_and(|related| related.target_table == anchor.table());

    if !self_anchored && !references_anchor {
        return Err(ConfigIssue::UnboundScopeColumn {
            entity: schema.key.clone(),
            column: column.to_string(),
            level: anchor,
        });
    }

    Ok(ScopeRoute {
        anchor,
        via: Vec::new(),
        column: column.to_string(),
        self_anchored,
    })
}

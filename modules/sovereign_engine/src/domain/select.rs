//! Select-string composer
//!
//! Builds the embed expression for an entity: display embeds for declared
//! relationships plus the ancestor chain toward the hierarchy root. Every hop
//! of the ancestor chain is an inner join, so rows with a broken ancestor link
//! (or whose ancestor fails an RBAC predicate) are excluded instead of being
//! returned with null ancestor data.

use super::hierarchy::ScopeRoute;
use super::validation::ConfigIssue;
use crate::contract::{EntitySchema, OrgLevel};

struct ChainHop {
    table: String,
    /// Column on the previous table that joins to this one
    link: String,
    columns: Vec<String>,
}

/// Compose the select expression for `schema`.
///
/// Returns `*` when the entity declares no relationships and needs no ancestor chain.
pub fn compose_select<'a>(
    schema: &EntitySchema,
    route: Option<&ScopeRoute>,
    lookup: impl Fn(&str) -> Option<&'a EntitySchema>,
) -> Result<String, ConfigIssue> {
    let chain_link = route.and_then(chain_link_column);
    let mut parts = vec!["*".to_string()];

    for (column, relationship) in &schema.relationships {
        if chain_link.as_deref() == Some(column.as_str()) {
            continue;
        }
        let related = lookup(&relationship.entity).ok_or_else(|| ConfigIssue::UnknownRelationship {
            entity: schema.key.clone(),
            column: column.clone(),
            target: relationship.entity.clone(),
        })?;
        let alias = relationship
            .alias
            .clone()
            .unwrap_or_else(|| default_alias(column));
        parts.push(format!(
            "{alias}:{table}!{column}({columns})",
            table = related.target_table,
            columns = relationship.display_columns.join(", "),
        ));
    }

    if let Some(route) = route {
        if let Some(chain) = render_chain(schema, route, chain_link.as_deref()) {
            parts.push(chain);
        }
    }

    Ok(parts.join(", "))
}

/// Column on the target table the ancestor chain hangs off
fn chain_link_column(route: &ScopeRoute) -> Option<String> {
    if let Some(first) = route.via.first() {
        return Some(first.link_column.clone());
    }
    if route.self_anchored {
        return route.anchor.parent().map(|level| level.foreign_key().to_string());
    }
    Some(route.column.clone())
}

fn render_chain(schema: &EntitySchema, route: &ScopeRoute, link: Option<&str>) -> Option<String> {
    let link_display: Vec<String> = link
        .and_then(|column| schema.relationships.get(column))
        .map(|rel| rel.display_columns.clone())
        .unwrap_or_default();

    let mut hops = Vec::new();
    for (index, hop) in route.via.iter().enumerate() {
        let next_link = route
            .via
            .get(index + 1)
            .map(|next| next.link_column.clone())
            .unwrap_or_else(|| route.column.clone());
        hops.push(ChainHop {
            table: hop.table.clone(),
            link: hop.link_column.clone(),
            columns: vec![hop.primary_key.clone(), next_link],
        });
    }
    let mut anchor_link = (!route.self_anchored).then(|| route.column.clone());
    hops.extend(route.hierarchy_hops().into_iter().map(|level| {
        let link = anchor_link
            .take()
            .unwrap_or_else(|| level.foreign_key().to_string());
        hierarchy_hop(level, link)
    }));

    if let Some(first) = hops.first_mut() {
        first.columns.extend(link_display);
    }

    let mut nested: Option<String> = None;
    for hop in hops.into_iter().rev() {
        let target = join_target(&hop);
        let mut columns = dedup(hop.columns);
        if let Some(inner) = nested.take() {
            columns.push(inner);
        }
        nested = Some(format!("{}!inner({})", target, columns.join(", ")));
    }
    nested
}

/// Table name, with the join column spelled out unless it is the standard foreign key
fn join_target(hop: &ChainHop) -> String {
    match OrgLevel::from_table(&hop.table) {
        Some(level) if hop.link == level.foreign_key() => hop.table.clone(),
        _ => format!("{}!{}", hop.table, hop.link),
    }
}

fn hierarchy_hop(level: OrgLevel, link: String) -> ChainHop {
    let mut columns = vec!["id".to_string(), "name".to_string()];
    if let Some(parent) = level.parent() {
        columns.push(parent.foreign_key().to_string());
    }
    ChainHop {
        table: level.table().to_string(),
        link,
        columns,
    }
}

fn default_alias(column: &str) -> String {
    match column.strip_suffix("_id") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{column}_ref"),
    }
}

fn dedup(columns: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(columns.len());
    for column in columns {
        if !seen.contains(&column) {
            seen.push(column);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{RbacLevel, Relationship};
    use crate::domain::hierarchy::ViaHop;

    fn branch_route(column: &str) -> ScopeRoute {
        ScopeRoute {
            anchor: OrgLevel::Branch,
            via: Vec::new(),
            column: column.to_string(),
            self_anchored: false,
        }
    }

    fn catalog() -> Vec<EntitySchema> {
        vec![
            EntitySchema::new("branches", "branches").scope_column("id"),
            EntitySchema::new("profiles", "profiles"),
            EntitySchema::new("ticket_categories", "ticket_categories").global(),
        ]
    }

    #[test]
    fn no_relationships_and_no_chain_selects_everything() {
        let schema = EntitySchema::new("ticket_categories", "ticket_categories").global();
        let select = compose_select(&schema, None, |_| None).unwrap();
        assert_eq!(select, "*");
    }

    #[test]
    fn branch_scoped_entity_gets_full_inner_chain() {
        let schemas = catalog();
        let tickets = EntitySchema::new("tickets", "tickets")
            .relation("branch_id", Relationship::to("branches"))
            .relation(
                "assigned_to",
                Relationship::to("profiles").alias("assignee").display(&["full_name"]),
            );

        let select = compose_select(&tickets, Some(&branch_route("branch_id")), |key| {
            schemas.iter().find(|s| s.key == key)
        })
        .unwrap();

        assert_eq!(
            select,
            "*, assignee:profiles!assigned_to(full_name), \
             branches!inner(id, name, area_id, areas!inner(id, name, sector_id, \
             sectors!inner(id, name, brand_id, brands!inner(id, name))))"
        );
    }

    #[test]
    fn hierarchy_table_embeds_its_parents_only() {
        let branches = EntitySchema::new("branches", "branches")
            .scope_column("id")
            .relation("area_id", Relationship::to("areas").display(&["name", "code"]));
        let route = ScopeRoute {
            column: "id".to_string(),
            self_anchored: true,
            ..branch_route("id")
        };

        let select = compose_select(&branches, Some(&route), |_| None).unwrap();
        assert!(select.starts_with("*, areas!inner(id, name, sector_id, code, sectors!inner("));
    }

    #[test]
    fn via_hop_comes_first_and_carries_display_columns() {
        let schemas = vec![EntitySchema::new("tickets", "tickets")];
        let comments = EntitySchema::new("ticket_comments", "ticket_comments")
            .scoped_via("ticket_id")
            .relation("ticket_id", Relationship::to("tickets").display(&["title"]));
        let route = ScopeRoute {
            via: vec![ViaHop {
                link_column: "ticket_id".to_string(),
                table: "tickets".to_string(),
                primary_key: "id".to_string(),
            }],
            ..branch_route("branch_id")
        };

        let select = compose_select(&comments, Some(&route), |key| {
            schemas.iter().find(|s| s.key == key)
        })
        .unwrap();
        assert!(select.starts_with("*, tickets!ticket_id!inner(id, branch_id, title, branches!inner("));
    }

    #[test]
    fn non_standard_link_to_a_hierarchy_table_is_named() {
        let documents = EntitySchema::new("branch_documents", "branch_documents")
            .scoped_via("site_id")
            .relation("site_id", Relationship::to("branches"));

        let select = compose_select(&documents, Some(&branch_route("site_id")), |_| None).unwrap();
        assert!(select.starts_with("*, branches!site_id!inner(id, name, area_id, areas!inner("));
    }

    #[test]
    fn unknown_relationship_target_is_a_config_issue() {
        let schema = EntitySchema::new("assets", "assets")
            .rbac(RbacLevel::Branch)
            .relation("vendor_id", Relationship::to("vendors"));

        let err = compose_select(&schema, None, |_| None).unwrap_err();
        assert!(matches!(err, ConfigIssue::UnknownRelationship { .. }));
    }

    #[test]
    fn default_alias_strips_id_suffix() {
        assert_eq!(default_alias("asset_id"), "asset");
        assert_eq!(default_alias("assigned_to"), "assigned_to_ref");
    }
}

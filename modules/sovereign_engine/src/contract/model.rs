//! Contract models for the data-table engine
//!
//! These models are transport-agnostic and shared between the domain layer and callers.
//! Schemas carry serde derives because they are persisted in the session schema cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A backend row as a JSON object
pub type Row = serde_json::Map<String, Value>;

/// Client-held filter state, keyed by column
pub type FilterSet = BTreeMap<String, FilterValue>;

pub const DEFAULT_PRIMARY_KEY: &str = "id";
pub const DEFAULT_SCOPE_COLUMN: &str = "branch_id";
pub const DEFAULT_SORT_COLUMN: &str = "created_at";
pub const SOFT_DELETE_COLUMN: &str = "is_deleted";

/// Organizational hierarchy level (brand → sector → area → branch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgLevel {
    Branch,
    Area,
    Sector,
    Brand,
}

/// Minimum hierarchy granularity at which an entity's rows are gated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RbacLevel {
    Branch,
    Area,
    Sector,
    Brand,
    Global,
}

impl RbacLevel {
    /// Hierarchy level the entity's rows are anchored to; `None` for global entities
    pub fn anchor(self) -> Option<OrgLevel> {
        match self {
            Self::Branch => Some(OrgLevel::Branch),
            Self::Area => Some(OrgLevel::Area),
            Self::Sector => Some(OrgLevel::Sector),
            Self::Brand => Some(OrgLevel::Brand),
            Self::Global => None,
        }
    }
}

/// Foreign-key link from a column to another registered entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Logical entity name of the related entity
    pub entity: String,
    /// Embed alias in the select expression (defaults to the column without `_id`)
    pub alias: Option<String>,
    /// Related columns fetched for display
    pub display_columns: Vec<String>,
}

impl Relationship {
    pub fn to(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: None,
            display_columns: vec!["name".to_string()],
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn display(mut self, columns: &[&str]) -> Self {
        self.display_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Kind of UI filter control for a filterable column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    Text,
    Select { options: Vec<String> },
    DateRange,
    Boolean,
    Relation { entity: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterableColumn {
    pub column: String,
    pub label: String,
    pub kind: FilterKind,
}

/// Declared count metric shown above an entity's table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    pub key: String,
    pub label: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    /// Predicate of the metric, AND-combined
    pub filter: FilterSet,
}

impl MetricDef {
    pub fn count(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            icon: None,
            color: None,
            filter: FilterSet::new(),
        }
    }

    pub fn when(mut self, column: impl Into<String>, value: FilterValue) -> Self {
        self.filter.insert(column.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub key: String,
    pub label: String,
    pub icon: Option<String>,
    /// Roles allowed to trigger the action; empty means every role
    pub roles: Vec<String>,
}

impl ActionDef {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            icon: None,
            roles: Vec::new(),
        }
    }

    pub fn for_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub ascending: bool,
}

impl SortSpec {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }
}

/// Declarative schema of one registered logical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Logical entity name (registry key)
    pub key: String,
    /// Backend table name
    pub target_table: String,
    pub label: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    /// Roles shown this entity in navigation; empty means every role
    pub roles: Vec<String>,
    /// Composed join expression, filled in by the registry
    pub select_expression: String,
    pub rbac_level: RbacLevel,
    /// Column binding RBAC scope directly on the target table
    pub direct_scope_column: Option<String>,
    /// Relationship column leading to another scoped entity, used when there is no direct column
    pub scope_via: Option<String>,
    pub primary_key: String,
    pub supports_soft_delete: bool,
    pub default_sort: Option<SortSpec>,
    /// Foreign-key column to related entity
    pub relationships: BTreeMap<String, Relationship>,
    pub filterable_columns: Vec<FilterableColumn>,
    pub metrics: Vec<MetricDef>,
    pub actions: Vec<ActionDef>,
}

impl EntitySchema {
    /// Start a branch-scoped schema bound through `branch_id`
    pub fn new(key: impl Into<String>, target_table: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            target_table: target_table.into(),
            description: String::new(),
            icon: String::new(),
            color: String::new(),
            roles: Vec::new(),
            select_expression: "*".to_string(),
            rbac_level: RbacLevel::Branch,
            direct_scope_column: Some(DEFAULT_SCOPE_COLUMN.to_string()),
            scope_via: None,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            supports_soft_delete: false,
            default_sort: None,
            relationships: BTreeMap::new(),
            filterable_columns: Vec::new(),
            metrics: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn display(
        mut self,
        label: impl Into<String>,
        description: impl Into<String>,
        icon: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        self.label = label.into();
        self.description = description.into();
        self.icon = icon.into();
        self.color = color.into();
        self
    }

    pub fn roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn rbac(mut self, level: RbacLevel) -> Self {
        self.rbac_level = level;
        self
    }

    pub fn global(mut self) -> Self {
        self.rbac_level = RbacLevel::Global;
        self.direct_scope_column = None;
        self
    }

    pub fn scope_column(mut self, column: impl Into<String>) -> Self {
        self.direct_scope_column = Some(column.into());
        self.scope_via = None;
        self
    }

    /// Bind scope through a relationship column instead of a direct column
    pub fn scoped_via(mut self, column: impl Into<String>) -> Self {
        self.direct_scope_column = None;
        self.scope_via = Some(column.into());
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.supports_soft_delete = true;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.default_sort = Some(sort);
        self
    }

    pub fn relation(mut self, column: impl Into<String>, relationship: Relationship) -> Self {
        self.relationships.insert(column.into(), relationship);
        self
    }

    pub fn filterable(mut self, column: &str, label: &str, kind: FilterKind) -> Self {
        self.filterable_columns.push(FilterableColumn {
            column: column.to_string(),
            label: label.to_string(),
            kind,
        });
        self
    }

    pub fn metric(mut self, metric: MetricDef) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn action(mut self, action: ActionDef) -> Self {
        self.actions.push(action);
        self
    }

    /// Effective sort order: declared default, else `created_at` descending
    pub fn effective_sort(&self) -> SortSpec {
        self.default_sort
            .clone()
            .unwrap_or_else(|| SortSpec::desc(DEFAULT_SORT_COLUMN))
    }

    /// Whether list fetches carry joins
    pub fn has_joins(&self) -> bool {
        self.select_expression.trim() != "*"
    }
}

/// Caller identity and position in the organizational hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerProfile {
    pub id: Uuid,
    pub role: String,
    pub brand_id: Option<Uuid>,
    pub sector_id: Option<Uuid>,
    pub area_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
}

impl CallerProfile {
    pub fn new(id: Uuid, role: impl Into<String>) -> Self {
        Self {
            id,
            role: role.into(),
            brand_id: None,
            sector_id: None,
            area_id: None,
            branch_id: None,
        }
    }

    pub fn with_brand(mut self, id: Uuid) -> Self {
        self.brand_id = Some(id);
        self
    }

    pub fn with_sector(mut self, id: Uuid) -> Self {
        self.sector_id = Some(id);
        self
    }

    pub fn with_area(mut self, id: Uuid) -> Self {
        self.area_id = Some(id);
        self
    }

    pub fn with_branch(mut self, id: Uuid) -> Self {
        self.branch_id = Some(id);
        self
    }

    /// Hierarchy identifier carried at the given level
    pub fn id_at(&self, level: OrgLevel) -> Option<Uuid> {
        match level {
            OrgLevel::Branch => self.branch_id,
            OrgLevel::Area => self.area_id,
            OrgLevel::Sector => self.sector_id,
            OrgLevel::Brand => self.brand_id,
        }
    }
}

/// Caller scope reduced to its most specific identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserScope {
    pub level: OrgLevel,
    pub id: Uuid,
}

/// Client-set filter value for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    /// Inclusive bounds; either side may be open
    Range {
        start: Option<Value>,
        end: Option<Value>,
    },
    /// Membership
    AnyOf(Vec<Value>),
    /// Equality
    Equals(Value),
}

impl FilterValue {
    pub fn equals(value: impl Into<Value>) -> Self {
        Self::Equals(value.into())
    }

    pub fn between(start: Option<Value>, end: Option<Value>) -> Self {
        Self::Range { start, end }
    }
}

/// One page of rows plus the size of the full matching set
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PagedResult {
    pub rows: Vec<Row>,
    /// Zero-based page index
    pub page: usize,
    pub page_size: usize,
    pub total_count: u64,
}

impl PagedResult {
    pub fn empty(page_size: usize) -> Self {
        Self {
            rows: Vec::new(),
            page: 0,
            page_size,
            total_count: 0,
        }
    }

    /// `max(1, ceil(total_count / page_size))`
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            return 1;
        }
        let pages = self.total_count.div_ceil(self.page_size as u64);
        usize::try_from(pages).unwrap_or(usize::MAX).max(1)
    }
}

/// Result of a bulk export request
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Rows(Vec<Row>),
    /// Refused: the matching set exceeds the export ceiling
    TooLarge { total_count: u64, ceiling: u64 },
    /// Refused: the matching set could not be counted
    Uncounted,
}

impl ExportOutcome {
    pub fn rows(&self) -> &[Row] {
        match self {
            Self::Rows(rows) => rows,
            Self::TooLarge { .. } | Self::Uncounted => &[],
        }
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, Self::TooLarge { .. } | Self::Uncounted)
    }
}

//! Contract layer - public API for callers of the engine
//!
//! This layer contains transport-agnostic models and the native client trait.

pub mod client;
pub mod error;
pub mod model;

pub use client::TableEngineApi;
pub use error::EngineError;
pub use model::{
    ActionDef, CallerProfile, EntitySchema, ExportOutcome, FilterKind, FilterSet, FilterValue,
    FilterableColumn, MetricDef, OrgLevel, PagedResult, RbacLevel, Relationship, Row, SortSpec,
    UserScope, DEFAULT_PRIMARY_KEY, DEFAULT_SCOPE_COLUMN, DEFAULT_SORT_COLUMN, SOFT_DELETE_COLUMN,
};

//! Sovereign Engine
//!
//! Registry-driven data-table engine: entity schemas, hierarchical RBAC
//! scoping, select-string composition, schema caching, and a data controller
//! with pagination, filters, bulk export and realtime patching.

// Public exports
pub mod contract;
pub use contract::{
    error::EngineError, CallerProfile, EntitySchema, ExportOutcome, FilterSet, FilterValue,
    OrgLevel, PagedResult, RbacLevel, Row, TableEngineApi,
};

pub mod module;
pub use module::SovereignEngine;

pub mod api;
pub mod config;
pub mod domain;
pub mod infra;

pub use config::Config;

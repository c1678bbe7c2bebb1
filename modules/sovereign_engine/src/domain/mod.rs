//! Domain layer - registry, scoping, query composition and orchestration

pub mod cache;
pub mod catalog;
pub mod controller;
pub mod events;
pub mod filters;
pub mod hierarchy;
pub mod query;
pub mod rbac;
pub mod registry;
pub mod repository;
pub mod select;
pub mod service;
pub mod validation;

pub use cache::{SchemaCache, SchemaCacheEntry};
pub use controller::{DataController, LoadOutcome};
pub use events::{patch_page, ChangeEvent, RowChange};
pub use filters::{apply_filters, parse_filters};
pub use hierarchy::{ScopeRoute, ViaHop};
pub use query::{CountMode, PageRange, Predicate, QueryResponse, TableQuery};
pub use rbac::{RbacFilter, ScopeDecision};
pub use registry::{EntityRegistry, RegistryError};
pub use repository::{ChangeStream, KeyValueStore, QueryService};
pub use service::Service;
pub use validation::{audit_schemas, AuditReport, ConfigIssue};

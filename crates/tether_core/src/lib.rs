//! Core domain logic for Tether.
//! This crate owns resource records and the two-way links between them.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, ConsistencyMode, CoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::kind::{IdPolicy, ResourceKind};
pub use model::patch::{Draft, Patch, PatchError};
pub use model::record::{EntityId, Fields, Record, Stub};
pub use model::relation::{Cardinality, LinkLayout, Relation};
pub use repo::entity_repo::{
    EntityListQuery, EntityPage, EntityStore, FieldFilter, QueryOp, SqliteEntityStore,
    StoreError, StoreResult,
};
pub use service::link_service::{
    CascadeFailure, CascadeReport, LinkError, LinkErrorKind, LinkResult, LinkService, Linked,
    Unlinked,
};
pub use service::resource_service::{ResourceError, ResourceResult, ResourceService};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Domain model for linked resource records.
//!
//! # Responsibility
//! - Define the closed set of resource kinds and the relations between them.
//! - Define the record, stub and patch shapes shared by store and services.
//!
//! # Invariants
//! - Every record is addressed by `(ResourceKind, EntityId)`.
//! - `id` and `self` are derived from the key, never stored in record fields.
//! - Link fields change only through the relationship manager.

pub mod kind;
pub mod patch;
pub mod record;
pub mod relation;

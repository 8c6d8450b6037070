//! Entity store contracts and persistence implementations.
//!
//! # Responsibility
//! - Define the get/put/delete/query contract the services rely on.
//! - Isolate SQLite and JSON path details from relationship logic.
//!
//! # Invariants
//! - The store serializes single-record writes; it offers no multi-record
//!   atomicity unless `EntityStore::atomically` is overridden.
//! - Deleting a missing record is not an error.

pub mod entity_repo;

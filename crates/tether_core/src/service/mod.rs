//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate entity store calls into resource and relationship APIs.
//! - Keep transport layers decoupled from storage and link layout details.

pub mod link_service;
pub mod resource_service;

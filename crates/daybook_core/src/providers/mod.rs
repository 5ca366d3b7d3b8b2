//! Domain providers composed over `PersistentState`.
//!
//! # Responsibility
//! - Own exactly one storage key each, claimed through `StorageRegistry`.
//! - Express domain CRUD as updates of the persisted record.
//!
//! # Invariants
//! - Providers never talk to a backend directly.

pub mod profile;
pub mod todo;

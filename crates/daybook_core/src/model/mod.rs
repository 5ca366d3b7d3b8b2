//! Records persisted by the bundled providers.
//!
//! # Invariants
//! - Every record keeps fields this build does not know about in a
//!   flattened `extra` map, so older and newer app builds can share data.

pub mod profile;
pub mod todo;

//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define record-level data access contracts.
//! - Isolate SQLite query details and the after-save hook contract from
//!   callers.
//!
//! # Invariants
//! - Repository writes must enforce `Item::validate()` before persistence.
//! - Every successful item save fires the after-save hook exactly once.

pub mod catalog_repo;
pub mod item_repo;

//! Record types persisted by the SQLite collaborator.
//!
//! # Responsibility
//! - Define stored row shapes together with their virtual attributes.
//!
//! # Invariants
//! - Records own their pending virtual attribute buffer; repositories only
//!   flush it through the after-save hook.

pub mod item;

//! Virtual attributes backed by many-to-many relations.
//!
//! # Responsibility
//! - Declare virtual attributes (`category_ids`) per record type.
//! - Buffer assigned id lists and sync them once the owner is saved.
//!
//! # Invariants
//! - Declarations are validated when the registry is built, never at sync.
//! - One attribute maps to exactly one relation and vice versa.

pub mod capability;
pub mod definition;
pub mod registry;
pub mod value;

pub use capability::{PendingAttributes, SyncError, SyncManyAttributes, SyncManyRecord, SyncReport};
pub use definition::{AttributeDefinition, DefinitionError, PivotField, PivotSpec};
pub use registry::AttributeRegistry;
pub use value::{AttributeValue, PivotMap, PivotValue, RelatedId};

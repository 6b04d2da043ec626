//! Virtual many-to-many id attributes for persisted records.
//!
//! Records declare attributes such as `category_ids`; assigned id lists are
//! buffered and synced to their join tables after the owning record saves.

pub mod attribute;
pub mod db;
pub mod logging;
pub mod model;
pub mod relation;
pub mod repo;

pub use attribute::{
    AttributeDefinition, AttributeRegistry, AttributeValue, DefinitionError, PivotField,
    PivotMap, PivotSpec, PivotValue, RelatedId, SyncError, SyncManyAttributes, SyncManyRecord,
    SyncReport,
};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings};
pub use model::item::{Item, ItemAttributeError, ItemId, ItemValidationError};
pub use relation::{
    BelongsToMany, ManyToManyRelation, PivotTable, RelationError, RelationResult, SyncChanges,
    SyncPayload,
};
pub use repo::catalog_repo::{CatalogEntry, CatalogKind, CatalogRepository, SqliteCatalogRepository};
pub use repo::item_repo::{ItemRepository, RepoError, RepoResult, SaveOutcome, SqliteItemRepository};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

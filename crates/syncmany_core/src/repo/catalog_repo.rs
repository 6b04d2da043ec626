//! Related-record repository for categories and tags.
//!
//! # Responsibility
//! - Create and list the records virtual attributes point at.
//!
//! # Invariants
//! - Names are trimmed and must be non-empty.
//! - Ids are listed in ascending order.

use crate::attribute::RelatedId;
use crate::db::table_exists;
use crate::repo::item_repo::{RepoError, RepoResult};
use rusqlite::Connection;

/// Related record kinds stored by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Category,
    Tag,
}

impl CatalogKind {
    fn table(self) -> &'static str {
        match self {
            Self::Category => "categories",
            Self::Tag => "tags",
        }
    }
}

/// Catalog entry as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: RelatedId,
    pub name: String,
}

/// Repository interface for related records.
pub trait CatalogRepository {
    fn create_entry(&self, kind: CatalogKind, name: &str) -> RepoResult<RelatedId>;
    fn list_entries(&self, kind: CatalogKind) -> RepoResult<Vec<CatalogEntry>>;

    fn create_category(&self, name: &str) -> RepoResult<RelatedId> {
        self.create_entry(CatalogKind::Category, name)
    }

    fn create_tag(&self, name: &str) -> RepoResult<RelatedId> {
        self.create_entry(CatalogKind::Tag, name)
    }

    /// Ids of every entry of `kind`, ascending.
    fn list_ids(&self, kind: CatalogKind) -> RepoResult<Vec<RelatedId>> {
        Ok(self
            .list_entries(kind)?
            .into_iter()
            .map(|entry| entry.id)
            .collect())
    }
}

/// SQLite-backed catalog repository.
pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        for kind in [CatalogKind::Category, CatalogKind::Tag] {
            if !table_exists(conn, kind.table())? {
                return Err(RepoError::MissingRequiredTable(kind.table()));
            }
        }
        Ok(Self { conn })
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn create_entry(&self, kind: CatalogKind, name: &str) -> RepoResult<RelatedId> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(RepoError::InvalidName(name.to_string()));
        }

        self.conn.execute(
            &format!("INSERT INTO {} (name) VALUES (?1);", kind.table()),
            [trimmed],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_entries(&self, kind: CatalogKind) -> RepoResult<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, name FROM {} ORDER BY id ASC;",
            kind.table()
        ))?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(CatalogEntry {
                id: row.get("id")?,
                name: row.get("name")?,
            });
        }
        Ok(entries)
    }
}

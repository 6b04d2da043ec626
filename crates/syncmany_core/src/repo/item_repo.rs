//! Item repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist `items` rows.
//! - Fire the item's after-save hook exactly once per successful save so
//!   pending virtual attributes reach their join tables.
//!
//! # Invariants
//! - Write paths call `Item::validate()` before SQL mutations.
//! - Row write and relation syncs share one savepoint: a failed save leaves
//!   neither the row change nor partial join rows behind.
//! - A failed save restores the item's id and pending buffer, so the caller
//!   can fix the input and save again.

use crate::attribute::{SyncError, SyncReport};
use crate::db::{table_exists, with_savepoint, DbError};
use crate::model::item::{Item, ItemId, ItemValidationError};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const ITEM_SAVE_SAVEPOINT: &str = "item_save";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for record persistence and relation sync.
#[derive(Debug)]
pub enum RepoError {
    Validation(ItemValidationError),
    Db(DbError),
    Sync(SyncError),
    NotFound(ItemId),
    /// Blank name for a related record.
    InvalidName(String),
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Sync(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::InvalidName(name) => write!(f, "invalid name: `{name}`"),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Sync(err) => Some(err),
            Self::NotFound(_) | Self::InvalidName(_) | Self::MissingRequiredTable(_) => None,
        }
    }
}

impl From<ItemValidationError> for RepoError {
    fn from(value: ItemValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SyncError> for RepoError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

/// Result of one successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub id: ItemId,
    /// `true` when the row was inserted, `false` when updated.
    pub inserted: bool,
    /// Relation changes applied by the after-save hook.
    pub synced: SyncReport,
}

/// Repository interface for item persistence.
pub trait ItemRepository {
    /// Inserts or updates `item`, then syncs its pending virtual attributes.
    fn save_item(&self, item: &mut Item) -> RepoResult<SaveOutcome>;
    /// Loads a fresh copy of one item with an empty pending buffer.
    fn get_item(&self, id: ItemId) -> RepoResult<Option<Item>>;
    /// Lists all items ordered by id.
    fn list_items(&self) -> RepoResult<Vec<Item>>;
    /// Deletes one item; its join rows cascade.
    fn delete_item(&self, id: ItemId) -> RepoResult<()>;
}

/// SQLite-backed item repository.
pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteItemRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        if !table_exists(conn, "items")? {
            return Err(RepoError::MissingRequiredTable("items"));
        }
        Ok(Self { conn })
    }

    fn persist_and_sync(&self, item: &mut Item) -> RepoResult<SaveOutcome> {
        let (id, inserted) = match item.id {
            None => {
                self.conn.execute(
                    "INSERT INTO items (name, price) VALUES (?1, ?2);",
                    params![item.name.as_str(), item.price],
                )?;
                let id = self.conn.last_insert_rowid();
                item.id = Some(id);
                (id, true)
            }
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE items SET name = ?1, price = ?2 WHERE id = ?3;",
                    params![item.name.as_str(), item.price, id],
                )?;
                if changed == 0 {
                    return Err(RepoError::NotFound(id));
                }
                (id, false)
            }
        };

        let synced = item.after_save(self.conn)?;
        Ok(SaveOutcome {
            id,
            inserted,
            synced,
        })
    }
}

impl ItemRepository for SqliteItemRepository<'_> {
    fn save_item(&self, item: &mut Item) -> RepoResult<SaveOutcome> {
        item.validate()?;

        let started_at = Instant::now();
        let previous_id = item.id;
        let pending = item.attributes().pending_snapshot();

        let saved = with_savepoint(self.conn, ITEM_SAVE_SAVEPOINT, || {
            self.persist_and_sync(item)
        });
        match saved {
            Ok(outcome) => {
                info!(
                    "event=item_save module=repo status=ok item_id={} inserted={} synced_attributes={} duration_ms={}",
                    outcome.id,
                    outcome.inserted,
                    outcome.synced.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(outcome)
            }
            Err(err) => {
                item.id = previous_id;
                item.attributes().restore_pending(pending);
                error!(
                    "event=item_save module=repo status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn get_item(&self, id: ItemId) -> RepoResult<Option<Item>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, price FROM items WHERE id = ?1;")?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_item_row(row)?));
        }
        Ok(None)
    }

    fn list_items(&self) -> RepoResult<Vec<Item>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, price FROM items ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn delete_item(&self, id: ItemId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM items WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<Item> {
    Ok(Item::from_row(
        Some(row.get("id")?),
        row.get::<_, String>("name")?,
        row.get("price")?,
    ))
}

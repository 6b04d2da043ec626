//! SQLite storage bootstrap, schema migrations and atomic scopes.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the sample record store.
//! - Apply schema migrations in deterministic order.
//! - Provide nesting-safe savepoint scopes for multi-statement writes.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Record and relation code must not touch tables before migrations succeed.

use log::warn;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    InvalidSavepointName(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidSavepointName(name) => write!(f, "invalid savepoint name `{name}`"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::InvalidSavepointName(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Runs `body` inside a named SQLite savepoint.
///
/// Savepoints nest, so this is safe to call while the caller already holds
/// an open transaction. The savepoint is released when `body` returns `Ok`
/// and rolled back otherwise. When the release itself fails (an outermost
/// release is a commit), the savepoint is rolled back before the error is
/// returned.
///
/// # Errors
/// - Returns `DbError::InvalidSavepointName` when `name` is not a plain
///   identifier.
/// - Propagates the error returned by `body` after rolling back.
pub fn with_savepoint<T, E>(
    conn: &Connection,
    name: &str,
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: From<DbError>,
{
    if !is_plain_identifier(name) {
        return Err(DbError::InvalidSavepointName(name.to_string()).into());
    }

    conn.execute_batch(&format!("SAVEPOINT {name};"))
        .map_err(DbError::from)?;

    match body() {
        Ok(value) => match conn.execute_batch(&format!("RELEASE {name};")) {
            Ok(()) => Ok(value),
            Err(release_err) => {
                rollback_savepoint(conn, name);
                Err(DbError::from(release_err).into())
            }
        },
        Err(err) => {
            rollback_savepoint(conn, name);
            Err(err)
        }
    }
}

/// Undoes and closes savepoint `name`; a failure here is only logged.
fn rollback_savepoint(conn: &Connection, name: &str) {
    if let Err(rollback_err) = conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))
    {
        warn!(
            "event=savepoint_rollback module=db status=error savepoint={} error={}",
            name, rollback_err
        );
    }
}

/// Returns whether `value` can be spliced into SQL as an identifier.
pub(crate) fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

/// Returns whether a table named `table` exists.
pub(crate) fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Returns whether `table` has a column named `column`.
pub(crate) fn table_has_column(conn: &Connection, table: &str, column: &str) -> DbResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

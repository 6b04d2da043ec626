//! Many-to-many relation contract and its SQLite implementation.
//!
//! # Responsibility
//! - Define what a virtual attribute needs from a relation: the current
//!   related id set and a "make it exactly this set" sync operation.
//! - Keep join-table SQL behind [`BelongsToMany`].
//!
//! # Invariants
//! - `sync` leaves exactly the requested ids associated.
//! - `sync` reports ids, never pivot values.

use crate::attribute::value::{PivotMap, RelatedId};
use crate::db::DbError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod belongs_to_many;

pub use belongs_to_many::{BelongsToMany, PivotTable};

pub type RelationResult<T> = Result<T, RelationError>;

/// Relation lookup and synchronization failures.
#[derive(Debug)]
pub enum RelationError {
    Db(DbError),
    /// The record exposes no relation under this name.
    UnknownRelation(String),
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: String,
    },
    /// Owning record has no primary key yet, so join rows cannot reference it.
    ParentNotPersisted(&'static str),
}

impl Display for RelationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UnknownRelation(name) => write!(f, "unknown relation `{name}`"),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "missing required column `{table}.{column}`")
            }
            Self::ParentNotPersisted(table) => {
                write!(f, "cannot sync `{table}` for a record that was never saved")
            }
        }
    }
}

impl Error for RelationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RelationError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RelationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Target state handed to [`ManyToManyRelation::sync`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    /// Plain id set, join rows carry no extra columns.
    Ids(Vec<RelatedId>),
    /// Id set where every id carries its own pivot column values.
    WithPivot(Vec<(RelatedId, PivotMap)>),
}

/// Change report of one relation sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncChanges {
    pub attached: Vec<RelatedId>,
    pub detached: Vec<RelatedId>,
    /// Kept ids whose pivot columns were rewritten.
    pub updated: Vec<RelatedId>,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty() && self.updated.is_empty()
    }
}

/// Join-table association between one owning record and related records.
pub trait ManyToManyRelation {
    /// Returns every currently related id, in attachment order.
    fn all_related_ids(&self) -> RelationResult<Vec<RelatedId>>;
    /// Makes the associated set exactly match `payload`.
    fn sync(&self, payload: SyncPayload) -> RelationResult<SyncChanges>;
}

//! SQLite join-table relation.
//!
//! # Responsibility
//! - Read the related id set of one owning record.
//! - Replace the related id set atomically, stamping pivot columns.
//!
//! # Invariants
//! - Table and column names are validated against `sqlite_master` and
//!   `PRAGMA table_info` before they are spliced into SQL.
//! - `sync` runs inside one savepoint; a failed sync leaves no partial rows.
//! - Related ids are returned in attachment (`rowid`) order.

use super::{ManyToManyRelation, RelationError, RelationResult, SyncChanges, SyncPayload};
use crate::attribute::value::{PivotMap, RelatedId};
use crate::db::{is_plain_identifier, table_exists, table_has_column, with_savepoint};
use log::{error, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeSet;
use std::time::Instant;

const SYNC_SAVEPOINT: &str = "relation_sync";

/// Join-table layout of one many-to-many relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PivotTable {
    pub table: &'static str,
    /// Column referencing the owning record.
    pub parent_key: &'static str,
    /// Column referencing the related record.
    pub related_key: &'static str,
}

/// Many-to-many relation of one owning record, backed by a join table.
pub struct BelongsToMany<'conn> {
    conn: &'conn Connection,
    pivot: PivotTable,
    parent_id: Option<i64>,
}

impl<'conn> BelongsToMany<'conn> {
    /// Binds a join table to one owning record.
    ///
    /// `parent_id` is `None` for records that were never saved; such a
    /// relation reports no related ids and refuses to sync.
    ///
    /// # Errors
    /// - `MissingRequiredTable` / `MissingRequiredColumn` when the join table
    ///   does not have the declared layout.
    pub fn try_new(
        conn: &'conn Connection,
        pivot: PivotTable,
        parent_id: Option<i64>,
    ) -> RelationResult<Self> {
        ensure_pivot_table_ready(conn, pivot)?;
        Ok(Self {
            conn,
            pivot,
            parent_id,
        })
    }

    fn require_parent(&self) -> RelationResult<i64> {
        self.parent_id
            .ok_or(RelationError::ParentNotPersisted(self.pivot.table))
    }

    fn ensure_pivot_columns<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> RelationResult<()> {
        for column in columns {
            if column == self.pivot.parent_key
                || column == self.pivot.related_key
                || !is_plain_identifier(column)
                || !table_has_column(self.conn, self.pivot.table, column)?
            {
                return Err(RelationError::MissingRequiredColumn {
                    table: self.pivot.table,
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    fn attach(&self, parent_id: i64, id: RelatedId, pivot: &PivotMap) -> RelationResult<()> {
        let mut columns = vec![self.pivot.parent_key, self.pivot.related_key];
        let mut bind_values = vec![Value::Integer(parent_id), Value::Integer(id)];
        for (column, value) in pivot {
            columns.push(column.as_str());
            bind_values.push(Value::from(value));
        }
        let placeholders = (1..=columns.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");

        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({placeholders});",
                self.pivot.table,
                columns.join(", ")
            ),
            params_from_iter(bind_values),
        )?;
        Ok(())
    }

    fn detach(&self, parent_id: i64, id: RelatedId) -> RelationResult<()> {
        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1 AND {} = ?2;",
                self.pivot.table, self.pivot.parent_key, self.pivot.related_key
            ),
            params![parent_id, id],
        )?;
        Ok(())
    }

    /// Rewrites pivot columns of a kept row; returns whether any value changed.
    fn update_pivot(
        &self,
        parent_id: i64,
        id: RelatedId,
        pivot: &PivotMap,
    ) -> RelationResult<bool> {
        if pivot.is_empty() {
            return Ok(false);
        }

        let mut assignments = Vec::with_capacity(pivot.len());
        let mut unchanged = Vec::with_capacity(pivot.len());
        let mut bind_values = vec![Value::Integer(parent_id), Value::Integer(id)];
        for (offset, (column, value)) in pivot.iter().enumerate() {
            let slot = offset + 3;
            assignments.push(format!("{column} = ?{slot}"));
            unchanged.push(format!("{column} IS ?{slot}"));
            bind_values.push(Value::from(value));
        }

        let changed = self.conn.execute(
            &format!(
                "UPDATE {table}
                 SET {assignments}
                 WHERE {parent_key} = ?1
                   AND {related_key} = ?2
                   AND NOT ({unchanged});",
                table = self.pivot.table,
                assignments = assignments.join(", "),
                parent_key = self.pivot.parent_key,
                related_key = self.pivot.related_key,
                unchanged = unchanged.join(" AND "),
            ),
            params_from_iter(bind_values),
        )?;
        Ok(changed > 0)
    }

    fn apply(
        &self,
        parent_id: i64,
        targets: &[(RelatedId, &PivotMap)],
    ) -> RelationResult<SyncChanges> {
        let current = self.all_related_ids()?;
        let target_ids: BTreeSet<RelatedId> = targets.iter().map(|(id, _)| *id).collect();
        let current_ids: BTreeSet<RelatedId> = current.iter().copied().collect();
        let mut changes = SyncChanges::default();

        for id in current.iter().filter(|id| !target_ids.contains(*id)) {
            self.detach(parent_id, *id)?;
            changes.detached.push(*id);
        }

        for (id, pivot) in targets {
            if current_ids.contains(id) {
                if self.update_pivot(parent_id, *id, pivot)? {
                    changes.updated.push(*id);
                }
            } else {
                self.attach(parent_id, *id, pivot)?;
                changes.attached.push(*id);
            }
        }

        Ok(changes)
    }
}

impl ManyToManyRelation for BelongsToMany<'_> {
    fn all_related_ids(&self) -> RelationResult<Vec<RelatedId>> {
        let Some(parent_id) = self.parent_id else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY rowid ASC;",
            self.pivot.related_key, self.pivot.table, self.pivot.parent_key
        ))?;
        let mut rows = stmt.query([parent_id])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    fn sync(&self, payload: SyncPayload) -> RelationResult<SyncChanges> {
        let started_at = Instant::now();
        let parent_id = self.require_parent()?;

        let empty = PivotMap::new();
        let mut seen = BTreeSet::new();
        let targets: Vec<(RelatedId, &PivotMap)> = match &payload {
            SyncPayload::Ids(ids) => ids
                .iter()
                .filter(|id| seen.insert(**id))
                .map(|id| (*id, &empty))
                .collect(),
            SyncPayload::WithPivot(entries) => entries
                .iter()
                .filter(|(id, _)| seen.insert(*id))
                .map(|(id, pivot)| (*id, pivot))
                .collect(),
        };
        let columns: BTreeSet<&String> = targets
            .iter()
            .flat_map(|(_, pivot)| pivot.keys())
            .collect();
        self.ensure_pivot_columns(columns)?;

        let result = with_savepoint(self.conn, SYNC_SAVEPOINT, || {
            self.apply(parent_id, &targets)
        });
        match &result {
            Ok(changes) => info!(
                "event=relation_sync module=relation status=ok table={} parent_id={} attached={} detached={} updated={} duration_ms={}",
                self.pivot.table,
                parent_id,
                changes.attached.len(),
                changes.detached.len(),
                changes.updated.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=relation_sync module=relation status=error table={} parent_id={} duration_ms={} error={}",
                self.pivot.table,
                parent_id,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}

fn ensure_pivot_table_ready(conn: &Connection, pivot: PivotTable) -> RelationResult<()> {
    if !is_plain_identifier(pivot.table) || !table_exists(conn, pivot.table)? {
        return Err(RelationError::MissingRequiredTable(pivot.table));
    }

    for column in [pivot.parent_key, pivot.related_key] {
        if !is_plain_identifier(column) || !table_has_column(conn, pivot.table, column)? {
            return Err(RelationError::MissingRequiredColumn {
                table: pivot.table,
                column: column.to_string(),
            });
        }
    }

    Ok(())
}

//! Conflict log repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{SyncConflict, TableName};
use rusqlite::{params, Connection};

/// Trait for the resolved-conflict audit log
pub trait ConflictRepository {
    /// Append a resolved conflict
    fn record(
        &self,
        table: TableName,
        record_id: &str,
        local_updated_at: i64,
        remote_updated_at: i64,
        strategy: &str,
    ) -> Result<()>;

    /// Most recently resolved conflicts first
    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a conflict from a database row
    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        let table: String = row.get(1)?;
        let table = table.parse::<TableName>().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, error.into())
        })?;
        Ok(SyncConflict {
            id: row.get(0)?,
            table,
            record_id: row.get(2)?,
            local_updated_at: row.get(3)?,
            remote_updated_at: row.get(4)?,
            resolved_at: row.get(5)?,
            strategy: row.get(6)?,
        })
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn record(
        &self,
        table: TableName,
        record_id: &str,
        local_updated_at: i64,
        remote_updated_at: i64,
        strategy: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (
                table_name, record_id, local_updated_at, remote_updated_at, resolved_at, strategy
            ) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                table.as_str(),
                record_id,
                local_updated_at,
                remote_updated_at,
                crate::util::now_millis(),
                strategy
            ],
        )?;
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, table_name, record_id, local_updated_at, remote_updated_at, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }
}

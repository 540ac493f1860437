//! Slot repository implementation
//!
//! A slot is one named JSON document: a table cache, the operation queue,
//! or a scalar piece of sync state.

use crate::error::Result;
use crate::util::now_millis;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for slot storage operations
pub trait SlotRepository {
    /// Raw slot contents, `None` when the slot was never written
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write (or overwrite) a slot
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a slot; no-op if absent
    fn remove(&self, key: &str) -> Result<()>;
}

/// `SQLite` implementation of `SlotRepository`
pub struct SqliteSlotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSlotRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SlotRepository for SqliteSlotRepository<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM slots WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO slots (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, now_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM slots WHERE key = ?", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_missing_slot_is_none() {
        let db = setup();
        let repo = SqliteSlotRepository::new(db.connection());

        assert_eq!(repo.get("queue").unwrap(), None);
    }

    #[test]
    fn test_set_overwrites_and_remove() {
        let db = setup();
        let repo = SqliteSlotRepository::new(db.connection());

        repo.set("sync_stats", "{}").unwrap();
        repo.set("sync_stats", "{\"total_syncs\":1}").unwrap();
        assert_eq!(
            repo.get("sync_stats").unwrap().as_deref(),
            Some("{\"total_syncs\":1}")
        );

        repo.remove("sync_stats").unwrap();
        repo.remove("sync_stats").unwrap();
        assert_eq!(repo.get("sync_stats").unwrap(), None);
    }
}

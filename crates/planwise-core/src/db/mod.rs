//! Database layer for Planwise

mod connection;
mod conflict_repository;
mod migrations;
mod slot_repository;

pub use connection::Database;
pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use slot_repository::{SlotRepository, SqliteSlotRepository};

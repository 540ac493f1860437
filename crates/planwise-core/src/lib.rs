//! planwise-core - Core library for Planwise
//!
//! Offline-first data layer shared by every Planwise client: a durable local
//! store, an operation queue for mutations made without connectivity, and a
//! synchronizer that replays them and reconciles each table with the hosted
//! backend using last-write-wins.

pub mod config;
pub mod db;
pub mod error;
pub mod facade;
pub mod models;
pub mod queue;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, RemoteError, Result};
pub use facade::{DataFacade, Served};
pub use models::{Filter, OperationKind, QueuedOperation, Record, RecordId, TableName};
pub use queue::{DrainReport, OperationQueue};
pub use remote::RemoteStore;
pub use service::{SyncOptions, SyncService};
pub use store::LocalStore;
pub use sync::{SyncEvent, SyncOutcome, SyncReport, Synchronizer};

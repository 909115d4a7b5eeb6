//! # intentflow-store
//!
//! SQLite persistence for intentflow.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ExecutionStore   (snapshots, optimistic v)  │
//! │  DedupLedger      (moka → processed_events)  │
//! │  SqliteRecordStore (data_update targets)     │
//! ├──────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, blocking pool)      │
//! │  Migrations (versioned, transactional)       │
//! └──────────────────────────────────────────────┘
//! ```

pub mod db;
pub mod dedup;
pub mod error;
pub mod execution_store;
pub mod migration;
pub mod records;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use dedup::DedupLedger;
pub use error::{StoreError, StoreResult};
pub use execution_store::ExecutionStore;
pub use records::{RecordStore, SqliteRecordStore};

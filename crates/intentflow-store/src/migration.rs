//! Schema migrations.
//!
//! Migrations are static SQL keyed by version.  Applied versions are
//! recorded in `_migrations`, so running them again is a no-op.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order.  Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "workflow execution snapshots",
        sql: r#"
            CREATE TABLE executions (
                id          TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                event_id    TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                status      TEXT NOT NULL CHECK(status IN
                    ('pending','running','completed','failed','cancelled','awaiting_approval')),
                version     INTEGER NOT NULL,
                snapshot    TEXT NOT NULL,
                started_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );
            CREATE INDEX idx_executions_user ON executions(user_id, started_at DESC);
            CREATE INDEX idx_executions_event ON executions(event_id);
            CREATE INDEX idx_executions_status ON executions(status);
        "#,
    },
    Migration {
        version: 2,
        description: "processed event ledger",
        sql: r#"
            CREATE TABLE processed_events (
                dedup_key    TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL,
                event_type   TEXT NOT NULL,
                source_id    TEXT NOT NULL,
                processed_at INTEGER NOT NULL
            );
            CREATE INDEX idx_processed_events_user ON processed_events(user_id);
        "#,
    },
    Migration {
        version: 3,
        description: "generic records written by data_update steps",
        sql: r#"
            CREATE TABLE records (
                model      TEXT NOT NULL,
                id         TEXT NOT NULL,
                data       TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (model, id)
            );
        "#,
    },
    Migration {
        version: 4,
        description: "key processed events on (user_id, event_type, source_id)",
        sql: r#"
            CREATE TABLE processed_events_v4 (
                user_id      TEXT NOT NULL,
                event_type   TEXT NOT NULL,
                source_id    TEXT NOT NULL,
                processed_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, event_type, source_id)
            );
            INSERT OR IGNORE INTO processed_events_v4
                SELECT user_id, event_type, source_id, processed_at FROM processed_events;
            DROP TABLE processed_events;
            ALTER TABLE processed_events_v4 RENAME TO processed_events;
        "#,
    },
];

/// Run all pending migrations.  Synchronous; call from the blocking pool.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(current_version = current, pending = pending.len(), "running pending migrations");
    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })
}

/// Highest version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside an explicit transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(version = migration.version, description = migration.description, "applying migration");

    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| fail(format!("SQL execution failed: {e}")))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.description,
                    chrono::Utc::now().timestamp()
                ],
            )
            .map(|_| ())
            .map_err(|e| fail(format!("failed to record migration: {e}")))
        });

    match result {
        Ok(()) => conn
            .execute_batch("COMMIT;")
            .map_err(|e| fail(format!("failed to commit: {e}"))),
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

//! Durable execution snapshots with optimistic concurrency.
//!
//! Each row holds the full JSON snapshot of a [`WorkflowExecution`] plus the
//! columns needed for lookups.  A write only lands when the snapshot's
//! `version` is strictly greater than the stored one, so a delayed writer
//! can never roll an execution back to an older state.

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use intentflow_core::{ExecutionStatus, WorkflowExecution};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Persistence for [`WorkflowExecution`] snapshots.
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    db: Database,
}

impl ExecutionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or update a snapshot.  Fails with
    /// [`StoreError::VersionConflict`] when the stored version is not older.
    #[instrument(
        skip(self, execution),
        fields(execution_id = %execution.id, version = execution.version)
    )]
    pub async fn save(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        let id = execution.id.to_string();
        let workflow_id = execution.workflow_id.clone();
        let event_id = execution.event_id.to_string();
        let user_id = execution.user_id.clone();
        let status = execution.status.as_str();
        let version = i64::try_from(execution.version)
            .map_err(|_| StoreError::InvalidArgument("version overflows i64".into()))?;
        let snapshot = serde_json::to_string(execution)?;
        let started_at = execution.started_at.timestamp_millis();
        let now = Utc::now().timestamp_millis();

        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO executions \
                        (id, workflow_id, event_id, user_id, status, version, snapshot, \
                         started_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(id) DO UPDATE SET \
                        status = excluded.status, \
                        version = excluded.version, \
                        snapshot = excluded.snapshot, \
                        updated_at = excluded.updated_at \
                     WHERE executions.version < excluded.version",
                    rusqlite::params![
                        id,
                        workflow_id,
                        event_id,
                        user_id,
                        status,
                        version,
                        snapshot,
                        started_at,
                        now
                    ],
                )?;

                if changed == 0 {
                    let stored: i64 = conn.query_row(
                        "SELECT version FROM executions WHERE id = ?1",
                        [&id],
                        |row| row.get(0),
                    )?;
                    return Err(StoreError::VersionConflict {
                        execution_id: id,
                        stored: u64::try_from(stored).unwrap_or_default(),
                        attempted: u64::try_from(version).unwrap_or_default(),
                    });
                }
                Ok(())
            })
            .await?;

        debug!("execution snapshot saved");
        Ok(())
    }

    /// Fetch one execution, or `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT snapshot FROM executions WHERE id = ?1",
                    [&id],
                    |row| row.get::<_, String>(0),
                );
                match result {
                    Ok(snapshot) => Ok(Some(serde_json::from_str(&snapshot)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// A user's executions, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        let user_id = user_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_snapshots(
            "SELECT snapshot FROM executions WHERE user_id = ?1 \
             ORDER BY started_at DESC, id DESC LIMIT ?2",
            vec![user_id.into(), limit.into()],
        )
        .await
    }

    /// All executions currently in `status`, oldest first.
    #[instrument(skip(self))]
    pub async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        self.query_snapshots(
            "SELECT snapshot FROM executions WHERE status = ?1 ORDER BY started_at ASC",
            vec![status.as_str().to_string().into()],
        )
        .await
    }

    /// Delete terminal executions last updated before `before_millis`
    /// (unix milliseconds).  Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn delete_finished_before(&self, before_millis: i64) -> StoreResult<usize> {
        self.db
            .execute(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM executions \
                     WHERE status IN ('completed','failed','cancelled') AND updated_at < ?1",
                    [before_millis],
                )?)
            })
            .await
    }

    async fn query_snapshots(
        &self,
        sql: &'static str,
        params: Vec<rusqlite::types::Value>,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    row.get::<_, String>(0)
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::{StepType, Workflow, WorkflowStep};
    use serde_json::Value;

    async fn store() -> ExecutionStore {
        ExecutionStore::new(Database::in_memory_migrated().await.unwrap())
    }

    fn execution(user: &str) -> WorkflowExecution {
        let wf = Workflow::new(
            "wf",
            "wf",
            vec![WorkflowStep::new("s", "s", StepType::Notification, Value::Null)],
        );
        WorkflowExecution::new(&wf, Uuid::now_v7(), user)
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = store().await;
        let exec = execution("u1");
        store.save(&exec).await.unwrap();
        assert_eq!(store.get(exec.id).await.unwrap(), Some(exec));
        assert_eq!(store.get(Uuid::now_v7()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_snapshot_is_rejected() {
        let store = store().await;
        let mut exec = execution("u1");
        store.save(&exec).await.unwrap();

        let stale = exec.clone();
        exec.transition(ExecutionStatus::Running).unwrap();
        store.save(&exec).await.unwrap();

        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { stored: 2, attempted: 1, .. }));
        // Re-saving the same version is also stale.
        assert!(store.save(&exec).await.is_err());
        assert_eq!(store.get(exec.id).await.unwrap().unwrap().status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn list_by_user_and_status() {
        let store = store().await;
        for _ in 0..3 {
            store.save(&execution("alice")).await.unwrap();
        }
        let mut running = execution("bob");
        running.transition(ExecutionStatus::Running).unwrap();
        store.save(&running).await.unwrap();

        assert_eq!(store.list_by_user("alice", 10).await.unwrap().len(), 3);
        assert_eq!(store.list_by_user("alice", 2).await.unwrap().len(), 2);
        let found = store.list_by_status(ExecutionStatus::Running).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "bob");
    }

    #[tokio::test]
    async fn delete_finished_keeps_active_rows() {
        let store = store().await;
        let mut done = execution("u1");
        done.transition(ExecutionStatus::Running).unwrap();
        done.transition(ExecutionStatus::Completed).unwrap();
        store.save(&done).await.unwrap();
        let pending = execution("u1");
        store.save(&pending).await.unwrap();

        let removed = store
            .delete_finished_before(Utc::now().timestamp_millis() + 1_000)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(pending.id).await.unwrap().is_some());
    }
}

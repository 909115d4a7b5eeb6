//! Records mutated by `data_update` steps.
//!
//! [`RecordStore`] is the seam the engine writes through; [`SqliteRecordStore`]
//! keeps records as JSON documents keyed by `(model, id)`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use uuid::Uuid;

use intentflow_core::DataOperation;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Applies named operations against named models.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Apply `operation` and return a summary of the stored record.
    async fn apply(
        &self,
        model: &str,
        operation: DataOperation,
        id: Option<&str>,
        data: &Value,
    ) -> StoreResult<Value>;

    async fn get(&self, model: &str, id: &str) -> StoreResult<Option<Value>>;
}

/// Shallow-merge `patch` into `base` when both are objects; otherwise the
/// patch replaces the base.
fn merge(base: Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
            Value::Object(base)
        }
        (_, patch) => patch.clone(),
    }
}

/// SQLite-backed [`RecordStore`].
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All records of a model, ordered by id.
    #[instrument(skip(self))]
    pub async fn list(&self, model: &str) -> StoreResult<Vec<(String, Value)>> {
        let model = model.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, data FROM records WHERE model = ?1 ORDER BY id")?;
                let rows = stmt.query_map([&model], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    let (id, data) = row?;
                    out.push((id, serde_json::from_str(&data)?));
                }
                Ok(out)
            })
            .await
    }
}

fn require_id(operation: DataOperation, id: Option<&str>) -> StoreResult<String> {
    id.filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            StoreError::InvalidArgument(format!("`{}` requires a record id", operation.as_str()))
        })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self, data))]
    async fn apply(
        &self,
        model: &str,
        operation: DataOperation,
        id: Option<&str>,
        data: &Value,
    ) -> StoreResult<Value> {
        if model.trim().is_empty() {
            return Err(StoreError::InvalidArgument("model name is empty".into()));
        }
        let model = model.to_string();
        let data = data.clone();
        let now = Utc::now().timestamp();

        let id = match operation {
            DataOperation::Create | DataOperation::Upsert => id
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            DataOperation::Update | DataOperation::Delete => require_id(operation, id)?,
        };

        let summary = self
            .db
            .execute(move |conn| {
                let existing: Option<String> = match conn.query_row(
                    "SELECT data FROM records WHERE model = ?1 AND id = ?2",
                    [&model, &id],
                    |row| row.get(0),
                ) {
                    Ok(data) => Some(data),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(StoreError::Sqlite(e)),
                };
                let not_found = || StoreError::NotFound {
                    entity: "record",
                    id: format!("{model}/{id}"),
                };

                let stored = match (operation, existing) {
                    (DataOperation::Create, Some(_)) => {
                        return Err(StoreError::InvalidArgument(format!(
                            "record {model}/{id} already exists"
                        )));
                    }
                    (DataOperation::Update | DataOperation::Delete, None) => {
                        return Err(not_found());
                    }
                    (DataOperation::Delete, Some(_)) => {
                        conn.execute(
                            "DELETE FROM records WHERE model = ?1 AND id = ?2",
                            [&model, &id],
                        )?;
                        return Ok(json!({
                            "model": model,
                            "id": id,
                            "operation": "delete",
                            "deleted": true,
                        }));
                    }
                    (DataOperation::Create, None) | (DataOperation::Upsert, None) => data,
                    (DataOperation::Update | DataOperation::Upsert, Some(current)) => {
                        merge(serde_json::from_str(&current)?, &data)
                    }
                };

                conn.execute(
                    "INSERT INTO records (model, id, data, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4) \
                     ON CONFLICT(model, id) DO UPDATE SET \
                        data = excluded.data, updated_at = excluded.updated_at",
                    rusqlite::params![model, id, serde_json::to_string(&stored)?, now],
                )?;
                Ok(json!({
                    "model": model,
                    "id": id,
                    "operation": operation.as_str(),
                    "data": stored,
                }))
            })
            .await?;

        debug!(operation = operation.as_str(), "record applied");
        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn get(&self, model: &str, id: &str) -> StoreResult<Option<Value>> {
        let (model, id) = (model.to_string(), id.to_string());
        self.db
            .execute(move |conn| {
                match conn.query_row(
                    "SELECT data FROM records WHERE model = ?1 AND id = ?2",
                    [&model, &id],
                    |row| row.get::<_, String>(0),
                ) {
                    Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteRecordStore {
        SqliteRecordStore::new(Database::in_memory_migrated().await.unwrap())
    }

    #[tokio::test]
    async fn create_update_delete_lifecycle() {
        let store = store().await;
        let visit = json!({"doctor": "Lee", "day": "Fri"});
        let created = store
            .apply("appointments", DataOperation::Create, Some("a1"), &visit)
            .await
            .unwrap();
        assert_eq!(created["id"], "a1");

        store
            .apply("appointments", DataOperation::Update, Some("a1"), &json!({"day": "Mon"}))
            .await
            .unwrap();
        assert_eq!(
            store.get("appointments", "a1").await.unwrap(),
            Some(json!({"doctor": "Lee", "day": "Mon"}))
        );

        let deleted = store
            .apply("appointments", DataOperation::Delete, Some("a1"), &Value::Null)
            .await
            .unwrap();
        assert_eq!(deleted["deleted"], true);
        assert_eq!(store.get("appointments", "a1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_generates_ids_and_rejects_duplicates() {
        let store = store().await;
        let out = store
            .apply("notes", DataOperation::Create, None, &json!({"t": 1}))
            .await
            .unwrap();
        let id = out["id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());

        let err = store
            .apply("notes", DataOperation::Create, Some(id.as_str()), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn update_and_delete_need_existing_records() {
        let store = store().await;
        assert!(matches!(
            store.apply("m", DataOperation::Update, Some("x"), &json!({})).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.apply("m", DataOperation::Delete, None, &json!({})).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn upsert_inserts_then_merges() {
        let store = store().await;
        for patch in [json!({"amount": 10}), json!({"status": "filed"})] {
            store
                .apply("claims", DataOperation::Upsert, Some("c1"), &patch)
                .await
                .unwrap();
        }
        assert_eq!(
            store.list("claims").await.unwrap(),
            vec![("c1".to_string(), json!({"amount": 10, "status": "filed"}))]
        );
    }
}

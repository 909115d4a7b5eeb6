//! Store components sharing one on-disk database.

use intentflow_core::{
    DataOperation, EventType, ExecutionStatus, StepType, Workflow, WorkflowExecution, WorkflowStep,
};
use intentflow_store::{Database, DedupLedger, ExecutionStore, RecordStore, SqliteRecordStore};
use serde_json::{Value, json};

#[tokio::test]
async fn state_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intentflow.db");

    let workflow = Workflow::new(
        "send-notification",
        "Notify",
        vec![WorkflowStep::new("n", "n", StepType::Notification, Value::Null)],
    );
    let mut exec = WorkflowExecution::new(&workflow, uuid::Uuid::now_v7(), "u1");

    {
        let db = Database::open_and_migrate(path.clone()).await.unwrap();
        let executions = ExecutionStore::new(db.clone());
        executions.save(&exec).await.unwrap();
        exec.transition(ExecutionStatus::Running).unwrap();
        executions.save(&exec).await.unwrap();

        let ledger = DedupLedger::durable(db.clone());
        assert!(ledger.claim("u1", EventType::Email, "msg-1").await.unwrap());
        SqliteRecordStore::new(db)
            .apply("contacts", DataOperation::Create, Some("c1"), &json!({"name": "Ana"}))
            .await
            .unwrap();
    }

    let db = Database::open_and_migrate(path).await.unwrap();
    let restored = ExecutionStore::new(db.clone()).get(exec.id).await.unwrap().unwrap();
    assert_eq!(restored.status, ExecutionStatus::Running);
    assert_eq!(restored.version, exec.version);

    let ledger = DedupLedger::durable(db.clone());
    assert!(!ledger.claim("u1", EventType::Email, "msg-1").await.unwrap());
    assert_eq!(
        SqliteRecordStore::new(db).get("contacts", "c1").await.unwrap(),
        Some(json!({"name": "Ana"}))
    );
}

use std::time::Duration;

use sqlgate_contracts::{ExecStatus, StorageFormat};
use sqlgate_ledger::{
    ExecutionRecord, ExecutionStore, LedgerError, PgLedger, ProgressUpdate, ResultSetRecord,
    ResultSetStore,
};

fn test_db_url() -> Option<String> {
    std::env::var("SQLGATE_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn schema_db_url(base: &str, schema: &str) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}options=-csearch_path%3D{schema}")
}

struct TestSchema {
    admin: sqlx::PgPool,
    name: String,
    url: String,
}

impl TestSchema {
    async fn create(db_url: &str) -> Self {
        let name = format!("sqlgate_test_{}", ulid::Ulid::new()).to_lowercase();
        let admin = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(db_url)
            .await
            .expect("DB connect should succeed");
        sqlx::query(&format!("CREATE SCHEMA {}", name))
            .execute(&admin)
            .await
            .expect("create schema should succeed");
        let url = schema_db_url(db_url, &name);
        Self { admin, name, url }
    }

    async fn teardown(self) {
        let _ = sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.name))
            .execute(&self.admin)
            .await;
        self.admin.close().await;
    }
}

fn execution(id: &str) -> ExecutionRecord {
    ExecutionRecord {
        execution_id: id.to_string(),
        engine: "trino".to_string(),
        datasource: "trino".to_string(),
        catalog: Some("hive".to_string()),
        schema: Some("ods".to_string()),
        dataset_id: Some("orders".to_string()),
        sql_text: "SELECT id FROM ods_orders".to_string(),
        executed_sql: "SELECT id FROM ods_orders LIMIT 1000".to_string(),
        query_hash: sqlgate_contracts::canonical::query_hash("SELECT id FROM ods_orders"),
        status: ExecStatus::Pending,
        limit_applied: true,
        dry_run: false,
        fetch_size: Some(500),
        client_request_id: None,
        elapsed_ms: 0,
        rows: 0,
        bytes: 0,
        queue_position: 0,
        remote_job_handle: None,
        result_set_id: None,
        error_message: None,
        submitted_by: "alice".to_string(),
        submitted_at_ms: 1_000,
        finished_at_ms: None,
    }
}

fn result_set(id: &str, expires_at_ms: i64) -> ResultSetRecord {
    ResultSetRecord {
        result_set_id: id.to_string(),
        owner: "alice".to_string(),
        storage_uri: format!("result-sets/{id}.json"),
        storage_format: StorageFormat::Json,
        columns: vec!["id".to_string(), "amount".to_string()],
        row_count: Some(3),
        ttl_days: 1,
        created_at_ms: 0,
        expires_at_ms,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execution_lifecycle_round_trips_through_postgres() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping DB store test; set SQLGATE_TEST_DB_URL to enable");
        return;
    };
    let schema = TestSchema::create(&db_url).await;

    let ledger = PgLedger::connect_and_migrate(&schema.url, Duration::from_millis(2000))
        .await
        .expect("ledger init should succeed");
    ledger.migrate().await.expect("migrations should be idempotent");

    ledger
        .insert_execution(&execution("e1"))
        .await
        .expect("insert should succeed");
    let loaded = ledger
        .load_execution("e1")
        .await
        .expect("load should succeed")
        .expect("execution exists");
    assert_eq!(loaded, execution("e1"));

    let mut running = ProgressUpdate::status(ExecStatus::Running);
    running.remote_job_handle = Some("job-7".to_string());
    running.queue_position = Some(2);
    let after = ledger
        .apply_progress("e1", ExecStatus::Pending, &running)
        .await
        .expect("pending -> running");
    assert_eq!(after.status, ExecStatus::Running);
    assert_eq!(after.remote_job_handle.as_deref(), Some("job-7"));

    let stale = ledger
        .apply_progress(
            "e1",
            ExecStatus::Pending,
            &ProgressUpdate::status(ExecStatus::Running),
        )
        .await;
    assert!(matches!(
        stale,
        Err(LedgerError::Conflict {
            current: ExecStatus::Running,
            ..
        })
    ));

    let canceled = ledger
        .cancel_execution("e1", 42)
        .await
        .expect("cancel should succeed")
        .expect("execution exists");
    assert_eq!(canceled.status, ExecStatus::Canceled);
    assert_eq!(canceled.finished_at_ms, Some(42));

    let missing = ledger
        .apply_progress(
            "nope",
            ExecStatus::Pending,
            &ProgressUpdate::status(ExecStatus::Running),
        )
        .await;
    assert!(matches!(missing, Err(LedgerError::NotFound)));
    assert!(
        ledger
            .cancel_execution("nope", 1)
            .await
            .expect("cancel should succeed")
            .is_none()
    );

    ledger.close().await;
    schema.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn purge_clears_references_before_deleting() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping DB purge test; set SQLGATE_TEST_DB_URL to enable");
        return;
    };
    let schema = TestSchema::create(&db_url).await;

    let ledger = PgLedger::connect_and_migrate(&schema.url, Duration::from_millis(2000))
        .await
        .expect("ledger init should succeed");

    for id in ["e1", "e2"] {
        ledger
            .insert_execution(&execution(id))
            .await
            .expect("insert should succeed");
    }
    ledger
        .attach_result_set("e1", &result_set("rs-old", 100))
        .await
        .expect("attach should succeed");
    ledger
        .attach_result_set("e2", &result_set("rs-live", 10_000))
        .await
        .expect("attach should succeed");

    let err = ledger
        .attach_result_set("missing", &result_set("rs-orphan", 100))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound));
    assert!(
        ledger
            .load_result_set("rs-orphan")
            .await
            .expect("load should succeed")
            .is_none()
    );

    let report = ledger.purge_expired(500).await.expect("purge should succeed");
    assert_eq!(report.deleted_ids, vec!["rs-old".to_string()]);
    assert_eq!(report.detached_executions, 1);

    let e1 = ledger
        .load_execution("e1")
        .await
        .expect("load should succeed")
        .expect("execution exists");
    assert_eq!(e1.result_set_id, None);

    let live = ledger
        .load_result_set("rs-live")
        .await
        .expect("load should succeed")
        .expect("live set kept");
    assert_eq!(live.columns, vec!["id".to_string(), "amount".to_string()]);

    let empty = ledger.purge_expired(500).await.expect("purge should succeed");
    assert_eq!(empty.deleted(), 0);

    let deleted = ledger
        .delete_result_set("rs-live")
        .await
        .expect("delete should succeed");
    assert_eq!(deleted.deleted(), 1);
    assert_eq!(deleted.detached_executions, 1);
    assert!(
        ledger
            .list_result_sets("alice")
            .await
            .expect("list should succeed")
            .is_empty()
    );

    ledger.close().await;
    schema.teardown().await;
}

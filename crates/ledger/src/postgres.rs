use std::time::Duration;

use async_trait::async_trait;
use sqlgate_contracts::{ExecStatus, StorageFormat};
use sqlx::Row;
use sqlx::postgres::{PgPoolOptions, PgRow};

use crate::{
    ExecutionRecord, ExecutionStore, LedgerError, ProgressUpdate, PurgeReport, ResultSetRecord,
    ResultSetStore, check_transition,
};

const EXECUTION_COLUMNS: &str = "execution_id, engine, datasource, catalog, schema_name, dataset_id, sql_text, executed_sql, query_hash, status, limit_applied, dry_run, fetch_size, client_request_id, elapsed_ms, row_count, bytes_processed, queue_position, remote_job_handle, result_set_id, error_message, submitted_by, submitted_at_ms, finished_at_ms";

const RESULT_SET_COLUMNS: &str = "result_set_id, owner, storage_uri, storage_format, columns, row_count, ttl_days, created_at_ms, expires_at_ms";

#[derive(Clone)]
pub struct PgLedger {
    pool: sqlx::PgPool,
    write_timeout: Duration,
}

impl PgLedger {
    pub async fn connect(db_url: &str, write_timeout: Duration) -> Result<Self, LedgerError> {
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            PgPoolOptions::new().max_connections(8).connect(db_url),
        )
        .await
        .map_err(|_| LedgerError::Timeout)??;

        Ok(Self {
            pool,
            write_timeout,
        })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        write_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let ledger = Self::connect(db_url, write_timeout).await?;
        ledger.migrate().await?;
        Ok(ledger)
    }

    pub async fn migrate(&self) -> Result<(), LedgerError> {
        tokio::time::timeout(Duration::from_secs(10), crate::migrate(&self.pool))
            .await
            .map_err(|_| LedgerError::Timeout)??;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: std::future::Future<Output = Result<T, LedgerError>> + Send,
    {
        tokio::time::timeout(self.write_timeout, fut)
            .await
            .map_err(|_| LedgerError::Timeout)?
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn execution_from_row(row: &PgRow) -> Result<ExecutionRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = ExecStatus::parse(&status)
        .ok_or_else(|| decode_error(format!("unknown execution status `{}`", status)))?;

    Ok(ExecutionRecord {
        execution_id: row.try_get("execution_id")?,
        engine: row.try_get("engine")?,
        datasource: row.try_get("datasource")?,
        catalog: row.try_get("catalog")?,
        schema: row.try_get("schema_name")?,
        dataset_id: row.try_get("dataset_id")?,
        sql_text: row.try_get("sql_text")?,
        executed_sql: row.try_get("executed_sql")?,
        query_hash: row.try_get("query_hash")?,
        status,
        limit_applied: row.try_get("limit_applied")?,
        dry_run: row.try_get("dry_run")?,
        fetch_size: row.try_get("fetch_size")?,
        client_request_id: row.try_get("client_request_id")?,
        elapsed_ms: row.try_get("elapsed_ms")?,
        rows: row.try_get("row_count")?,
        bytes: row.try_get("bytes_processed")?,
        queue_position: row.try_get("queue_position")?,
        remote_job_handle: row.try_get("remote_job_handle")?,
        result_set_id: row.try_get("result_set_id")?,
        error_message: row.try_get("error_message")?,
        submitted_by: row.try_get("submitted_by")?,
        submitted_at_ms: row.try_get("submitted_at_ms")?,
        finished_at_ms: row.try_get("finished_at_ms")?,
    })
}

fn result_set_from_row(row: &PgRow) -> Result<ResultSetRecord, sqlx::Error> {
    let format: String = row.try_get("storage_format")?;
    let storage_format = StorageFormat::parse(&format)
        .ok_or_else(|| decode_error(format!("unknown storage format `{}`", format)))?;

    Ok(ResultSetRecord {
        result_set_id: row.try_get("result_set_id")?,
        owner: row.try_get("owner")?,
        storage_uri: row.try_get("storage_uri")?,
        storage_format,
        columns: row.try_get("columns")?,
        row_count: row.try_get("row_count")?,
        ttl_days: row.try_get("ttl_days")?,
        created_at_ms: row.try_get("created_at_ms")?,
        expires_at_ms: row.try_get("expires_at_ms")?,
    })
}

#[async_trait]
impl ExecutionStore for PgLedger {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), LedgerError> {
        self.timed(async {
            sqlx::query(
                "INSERT INTO sqlgate_query_executions (execution_id, engine, datasource, catalog, schema_name, dataset_id, sql_text, executed_sql, query_hash, status, limit_applied, dry_run, fetch_size, client_request_id, elapsed_ms, row_count, bytes_processed, queue_position, remote_job_handle, result_set_id, error_message, submitted_by, submitted_at_ms, finished_at_ms) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24)",
            )
            .bind(&record.execution_id)
            .bind(&record.engine)
            .bind(&record.datasource)
            .bind(&record.catalog)
            .bind(&record.schema)
            .bind(&record.dataset_id)
            .bind(&record.sql_text)
            .bind(&record.executed_sql)
            .bind(&record.query_hash)
            .bind(record.status.as_str())
            .bind(record.limit_applied)
            .bind(record.dry_run)
            .bind(record.fetch_size)
            .bind(&record.client_request_id)
            .bind(record.elapsed_ms)
            .bind(record.rows)
            .bind(record.bytes)
            .bind(record.queue_position)
            .bind(&record.remote_job_handle)
            .bind(&record.result_set_id)
            .bind(&record.error_message)
            .bind(&record.submitted_by)
            .bind(record.submitted_at_ms)
            .bind(record.finished_at_ms)
            .execute(&self.pool)
            .await?;
            Ok::<_, LedgerError>(())
        })
        .await
    }

    async fn load_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM sqlgate_query_executions WHERE execution_id = $1",
            EXECUTION_COLUMNS
        );
        self.timed(async {
            let row = sqlx::query(&sql)
                .bind(execution_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok::<_, LedgerError>(row.as_ref().map(execution_from_row).transpose()?)
        })
        .await
    }

    async fn cancel_execution(
        &self,
        execution_id: &str,
        finished_at_ms: i64,
    ) -> Result<Option<ExecutionRecord>, LedgerError> {
        let sql = format!(
            "UPDATE sqlgate_query_executions SET status = $2, finished_at_ms = $3 WHERE execution_id = $1 RETURNING {}",
            EXECUTION_COLUMNS
        );
        self.timed(async {
            let row = sqlx::query(&sql)
                .bind(execution_id)
                .bind(ExecStatus::Canceled.as_str())
                .bind(finished_at_ms)
                .fetch_optional(&self.pool)
                .await?;
            Ok::<_, LedgerError>(row.as_ref().map(execution_from_row).transpose()?)
        })
        .await
    }

    async fn apply_progress(
        &self,
        execution_id: &str,
        expected: ExecStatus,
        update: &ProgressUpdate,
    ) -> Result<ExecutionRecord, LedgerError> {
        check_transition(expected, update.status)?;

        let sql = format!(
            "UPDATE sqlgate_query_executions SET status = $3, elapsed_ms = COALESCE($4, elapsed_ms), row_count = COALESCE($5, row_count), bytes_processed = COALESCE($6, bytes_processed), queue_position = COALESCE($7, queue_position), remote_job_handle = COALESCE($8, remote_job_handle), error_message = COALESCE($9, error_message), finished_at_ms = COALESCE($10, finished_at_ms) WHERE execution_id = $1 AND status = $2 RETURNING {}",
            EXECUTION_COLUMNS
        );
        self.timed(async {
            let row = sqlx::query(&sql)
                .bind(execution_id)
                .bind(expected.as_str())
                .bind(update.status.as_str())
                .bind(update.elapsed_ms)
                .bind(update.rows)
                .bind(update.bytes)
                .bind(update.queue_position)
                .bind(&update.remote_job_handle)
                .bind(&update.error_message)
                .bind(update.finished_at_ms)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = row {
                return Ok(execution_from_row(&row)?);
            }

            let current: Option<String> = sqlx::query_scalar(
                "SELECT status FROM sqlgate_query_executions WHERE execution_id = $1",
            )
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
            match current.as_deref().map(ExecStatus::parse) {
                None => Err::<ExecutionRecord, _>(LedgerError::NotFound),
                Some(current) => Err(LedgerError::Conflict {
                    current: current.unwrap_or(expected),
                    attempted: update.status,
                }),
            }
        })
        .await
    }
}

#[async_trait]
impl ResultSetStore for PgLedger {
    async fn attach_result_set(
        &self,
        execution_id: &str,
        record: &ResultSetRecord,
    ) -> Result<(), LedgerError> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "INSERT INTO sqlgate_result_sets (result_set_id, owner, storage_uri, storage_format, columns, row_count, ttl_days, created_at_ms, expires_at_ms) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            )
            .bind(&record.result_set_id)
            .bind(&record.owner)
            .bind(&record.storage_uri)
            .bind(record.storage_format.as_str())
            .bind(&record.columns)
            .bind(record.row_count)
            .bind(record.ttl_days)
            .bind(record.created_at_ms)
            .bind(record.expires_at_ms)
            .execute(&mut *tx)
            .await?;

            let linked = sqlx::query(
                "UPDATE sqlgate_query_executions SET result_set_id = $1 WHERE execution_id = $2",
            )
            .bind(&record.result_set_id)
            .bind(execution_id)
            .execute(&mut *tx)
            .await?;

            if linked.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(LedgerError::NotFound);
            }

            tx.commit().await?;
            Ok::<_, LedgerError>(())
        })
        .await
    }

    async fn load_result_set(
        &self,
        result_set_id: &str,
    ) -> Result<Option<ResultSetRecord>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM sqlgate_result_sets WHERE result_set_id = $1",
            RESULT_SET_COLUMNS
        );
        self.timed(async {
            let row = sqlx::query(&sql)
                .bind(result_set_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok::<_, LedgerError>(row.as_ref().map(result_set_from_row).transpose()?)
        })
        .await
    }

    async fn list_result_sets(&self, owner: &str) -> Result<Vec<ResultSetRecord>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM sqlgate_result_sets WHERE owner = $1 ORDER BY created_at_ms DESC, result_set_id DESC",
            RESULT_SET_COLUMNS
        );
        self.timed(async {
            let rows = sqlx::query(&sql).bind(owner).fetch_all(&self.pool).await?;
            Ok::<_, LedgerError>(rows
                .iter()
                .map(result_set_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn delete_result_set(&self, result_set_id: &str) -> Result<PurgeReport, LedgerError> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;

            let detached = sqlx::query(
                "UPDATE sqlgate_query_executions SET result_set_id = NULL WHERE result_set_id = $1",
            )
            .bind(result_set_id)
            .execute(&mut *tx)
            .await?;

            let deleted = sqlx::query("DELETE FROM sqlgate_result_sets WHERE result_set_id = $1")
                .bind(result_set_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            if deleted.rows_affected() == 0 {
                return Ok(PurgeReport::default());
            }
            Ok::<_, LedgerError>(PurgeReport {
                deleted_ids: vec![result_set_id.to_string()],
                detached_executions: detached.rows_affected(),
            })
        })
        .await
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<PurgeReport, LedgerError> {
        self.timed(async {
            let expired: Vec<String> = sqlx::query_scalar(
                "SELECT result_set_id FROM sqlgate_result_sets WHERE expires_at_ms < $1 ORDER BY result_set_id",
            )
            .bind(now_ms)
            .fetch_all(&self.pool)
            .await?;

            if expired.is_empty() {
                return Ok(PurgeReport::default());
            }

            let mut tx = self.pool.begin().await?;

            let detached = sqlx::query(
                "UPDATE sqlgate_query_executions SET result_set_id = NULL WHERE result_set_id = ANY($1)",
            )
            .bind(&expired)
            .execute(&mut *tx)
            .await?;

            let deleted_ids: Vec<String> = sqlx::query_scalar(
                "DELETE FROM sqlgate_result_sets WHERE result_set_id = ANY($1) AND expires_at_ms < $2 RETURNING result_set_id",
            )
            .bind(&expired)
            .bind(now_ms)
            .fetch_all(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok::<_, LedgerError>(PurgeReport {
                deleted_ids,
                detached_executions: detached.rows_affected(),
            })
        })
        .await
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.timed(async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok::<_, LedgerError>(())
        })
        .await
    }
}

use async_trait::async_trait;
use sqlgate_contracts::{ExecStatus, StorageFormat};

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

#[derive(Debug)]
pub enum LedgerError {
    Timeout,
    Sqlx(sqlx::Error),
    NotFound,
    Conflict {
        current: ExecStatus,
        attempted: ExecStatus,
    },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Timeout => write!(f, "ledger operation timed out"),
            LedgerError::Sqlx(err) => write!(f, "ledger sql error: {}", err),
            LedgerError::NotFound => write!(f, "ledger record not found"),
            LedgerError::Conflict { current, attempted } => write!(
                f,
                "execution is {} and cannot move to {}",
                current.as_str(),
                attempted.as_str()
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<sqlx::Error> for LedgerError {
    fn from(value: sqlx::Error) -> Self {
        LedgerError::Sqlx(value)
    }
}

/// One submitted query and everything known about its run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub engine: String,
    pub datasource: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub dataset_id: Option<String>,
    pub sql_text: String,
    pub executed_sql: String,
    pub query_hash: String,
    pub status: ExecStatus,
    pub limit_applied: bool,
    pub dry_run: bool,
    pub fetch_size: Option<i32>,
    pub client_request_id: Option<String>,
    pub elapsed_ms: i64,
    pub rows: i64,
    pub bytes: i64,
    pub queue_position: i32,
    pub remote_job_handle: Option<String>,
    pub result_set_id: Option<String>,
    pub error_message: Option<String>,
    pub submitted_by: String,
    pub submitted_at_ms: i64,
    pub finished_at_ms: Option<i64>,
}

/// Progress reported by the engine backend. `None` fields keep their stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub status: ExecStatus,
    pub elapsed_ms: Option<i64>,
    pub rows: Option<i64>,
    pub bytes: Option<i64>,
    pub queue_position: Option<i32>,
    pub remote_job_handle: Option<String>,
    pub error_message: Option<String>,
    pub finished_at_ms: Option<i64>,
}

impl ProgressUpdate {
    pub fn status(status: ExecStatus) -> Self {
        Self {
            status,
            elapsed_ms: None,
            rows: None,
            bytes: None,
            queue_position: None,
            remote_job_handle: None,
            error_message: None,
            finished_at_ms: None,
        }
    }

    pub(crate) fn apply_to(&self, record: &mut ExecutionRecord) {
        record.status = self.status;
        if let Some(v) = self.elapsed_ms {
            record.elapsed_ms = v;
        }
        if let Some(v) = self.rows {
            record.rows = v;
        }
        if let Some(v) = self.bytes {
            record.bytes = v;
        }
        if let Some(v) = self.queue_position {
            record.queue_position = v;
        }
        if let Some(v) = &self.remote_job_handle {
            record.remote_job_handle = Some(v.clone());
        }
        if let Some(v) = &self.error_message {
            record.error_message = Some(v.clone());
        }
        if let Some(v) = self.finished_at_ms {
            record.finished_at_ms = Some(v);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSetRecord {
    pub result_set_id: String,
    pub owner: String,
    pub storage_uri: String,
    pub storage_format: StorageFormat,
    pub columns: Vec<String>,
    pub row_count: Option<i64>,
    pub ttl_days: i32,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted_ids: Vec<String>,
    pub detached_executions: u64,
}

impl PurgeReport {
    pub fn deleted(&self) -> u64 {
        self.deleted_ids.len() as u64
    }
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), LedgerError>;

    async fn load_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, LedgerError>;

    /// Marks the execution CANCELED whatever its current state. `None` when it does not exist.
    async fn cancel_execution(
        &self,
        execution_id: &str,
        finished_at_ms: i64,
    ) -> Result<Option<ExecutionRecord>, LedgerError>;

    /// Compare-and-set on status: applies `update` only while the stored status equals
    /// `expected` and the transition is one the backend may make.
    async fn apply_progress(
        &self,
        execution_id: &str,
        expected: ExecStatus,
        update: &ProgressUpdate,
    ) -> Result<ExecutionRecord, LedgerError>;
}

#[async_trait]
pub trait ResultSetStore: Send + Sync {
    /// Stores the result set and points the execution at it, atomically.
    async fn attach_result_set(
        &self,
        execution_id: &str,
        record: &ResultSetRecord,
    ) -> Result<(), LedgerError>;

    async fn load_result_set(
        &self,
        result_set_id: &str,
    ) -> Result<Option<ResultSetRecord>, LedgerError>;

    async fn list_result_sets(&self, owner: &str) -> Result<Vec<ResultSetRecord>, LedgerError>;

    /// Clears execution references and deletes the set in one transaction.
    async fn delete_result_set(&self, result_set_id: &str) -> Result<PurgeReport, LedgerError>;

    /// Deletes every set with `expires_at_ms < now_ms`. All or nothing.
    async fn purge_expired(&self, now_ms: i64) -> Result<PurgeReport, LedgerError>;

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

pub(crate) fn check_transition(
    current: ExecStatus,
    attempted: ExecStatus,
) -> Result<(), LedgerError> {
    if current.can_advance_to(attempted) {
        Ok(())
    } else {
        Err(LedgerError::Conflict { current, attempted })
    }
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn migrate_url(db_url: &str) -> Result<(), sqlx::Error> {
    let pool = sqlx::PgPool::connect(db_url).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlgate_contracts::{
    CleanupResponse, ExecStatus, ResultSetView, StatusResponse, StorageFormat, SubmitRequest,
    SubmitResponse, ValidateRequest, ValidateResponse, canonical,
};
use sqlgate_ledger::{
    ExecutionRecord, ExecutionStore, LedgerError, ProgressUpdate, ResultSetRecord,
    ResultSetStore,
};
use sqlgate_policy::{
    AccessChecker, DatasetMetadataResolver, DatasetRef, SecurityGuardError, SqlGuard,
    SqlValidator, Subject, ValidationReport, projection_columns,
};
use ulid::Ulid;

use crate::expiry::{ResultSetExpiryJob, SweepOutcome};

const DAY_MS: i64 = 86_400_000;

#[derive(Debug)]
pub enum ServiceError {
    InvalidRequest(String),
    Blocked(ValidationReport),
    Guard(SecurityGuardError),
    DatasetNotFound(String),
    NotFound,
    Forbidden(String),
    NotSucceeded(ExecStatus),
    SweepInProgress,
    Ledger(LedgerError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::InvalidRequest(reason) => write!(f, "invalid request: {}", reason),
            ServiceError::Blocked(report) => write!(f, "statement {}", report.summary()),
            ServiceError::Guard(err) => write!(f, "{}", err),
            ServiceError::DatasetNotFound(id) => write!(f, "dataset {} is not registered", id),
            ServiceError::NotFound => write!(f, "not found"),
            ServiceError::Forbidden(reason) => write!(f, "{}", reason),
            ServiceError::NotSucceeded(status) => write!(
                f,
                "execution is {}; only SUCCEEDED executions can save results",
                status.as_str()
            ),
            ServiceError::SweepInProgress => {
                write!(f, "a result set sweep is already running")
            }
            ServiceError::Ledger(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<LedgerError> for ServiceError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound => ServiceError::NotFound,
            other => ServiceError::Ledger(other),
        }
    }
}

impl From<SecurityGuardError> for ServiceError {
    fn from(value: SecurityGuardError) -> Self {
        ServiceError::Guard(value)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionDefaults {
    pub engine: String,
    pub datasource: String,
    pub result_set_ttl_days: u32,
    pub result_set_admin_roles: Vec<String>,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            engine: "trino".to_string(),
            datasource: "trino".to_string(),
            result_set_ttl_days: 7,
            result_set_admin_roles: vec![
                "ROLE_DATA_MAINTAINER".to_string(),
                "ROLE_OP_ADMIN".to_string(),
            ],
        }
    }
}

/// Validated and guarded form of a submitted statement.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub report: ValidationReport,
    pub executed_sql: String,
    pub dataset: Option<DatasetRef>,
    pub guarded: bool,
}

impl PreparedQuery {
    fn plan(&self, engine: &str, datasource: &str) -> serde_json::Value {
        serde_json::json!({
            "statement": self.report.statement,
            "engine": engine,
            "datasource": datasource,
            "dataset_id": self.dataset.as_ref().map(|d| d.dataset_id.as_str()),
            "table": self.dataset.as_ref().map(|d| d.qualified_table()),
            "classification_guard": if self.guarded { "applied" } else { "skipped" },
            "query_hash": canonical::query_hash(&self.executed_sql),
        })
    }
}

#[derive(Clone)]
pub struct ExecutionService {
    validator: SqlValidator,
    guard: Arc<SqlGuard<Arc<dyn AccessChecker>>>,
    datasets: Arc<dyn DatasetMetadataResolver>,
    executions: Arc<dyn ExecutionStore>,
    result_sets: Arc<dyn ResultSetStore>,
    expiry: ResultSetExpiryJob,
    defaults: ExecutionDefaults,
}

impl ExecutionService {
    pub fn new(
        validator: SqlValidator,
        access: Arc<dyn AccessChecker>,
        datasets: Arc<dyn DatasetMetadataResolver>,
        executions: Arc<dyn ExecutionStore>,
        result_sets: Arc<dyn ResultSetStore>,
        defaults: ExecutionDefaults,
    ) -> Self {
        Self {
            validator,
            guard: Arc::new(SqlGuard::new(access)),
            datasets,
            executions,
            expiry: ResultSetExpiryJob::new(Arc::clone(&result_sets)),
            result_sets,
            defaults,
        }
    }

    pub fn result_sets(&self) -> Arc<dyn ResultSetStore> {
        Arc::clone(&self.result_sets)
    }

    /// The sweep shared by the scheduler and manual cleanup; clones share one running flag.
    pub fn expiry_job(&self) -> ResultSetExpiryJob {
        self.expiry.clone()
    }

    fn resolve_dataset(
        &self,
        dataset_id: Option<&str>,
    ) -> Result<Option<DatasetRef>, ServiceError> {
        let Some(dataset_id) = dataset_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        self.datasets
            .resolve(dataset_id)
            .map(Some)
            .ok_or_else(|| ServiceError::DatasetNotFound(dataset_id.to_string()))
    }

    /// Runs the validator and, for executable dataset-bound statements, the classification guard.
    pub fn prepare(
        &self,
        subject: &Subject,
        sql_text: &str,
        dataset_id: Option<&str>,
    ) -> Result<PreparedQuery, ServiceError> {
        let dataset = self.resolve_dataset(dataset_id)?;
        let report = self.validator.validate(sql_text);
        crate::metrics::observe_validation(
            report.executable,
            report.limit_info.as_ref().is_some_and(|l| l.applied),
        );

        if !report.executable {
            return Ok(PreparedQuery {
                executed_sql: report.rewritten_sql.clone(),
                report,
                dataset,
                guarded: false,
            });
        }

        let guarded = dataset
            .as_ref()
            .is_some_and(|d| d.quoted_classification_column().is_some());
        let executed_sql = match self
            .guard
            .guard(subject, &report.rewritten_sql, dataset.as_ref())
        {
            Ok(sql) => {
                crate::metrics::observe_guard_outcome(if guarded {
                    "rewritten"
                } else {
                    "passthrough"
                });
                sql
            }
            Err(err) => {
                crate::metrics::observe_guard_outcome(match err {
                    SecurityGuardError::NoClassificationAccess => "denied",
                    _ => "unsupported",
                });
                return Err(err.into());
            }
        };

        Ok(PreparedQuery {
            report,
            executed_sql,
            dataset,
            guarded,
        })
    }

    pub fn validate(
        &self,
        subject: &Subject,
        req: &ValidateRequest,
    ) -> Result<ValidateResponse, ServiceError> {
        let prepared = self.prepare(subject, &req.sql_text, req.dataset_id.as_deref())?;
        let datasource = req
            .datasource
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.defaults.datasource.as_str());
        let plan = prepared
            .report
            .executable
            .then(|| prepared.plan(&self.defaults.engine, datasource));

        Ok(ValidateResponse {
            executable: prepared.report.executable,
            summary: prepared.report.summary(),
            rewritten_sql: prepared.executed_sql,
            violations: prepared.report.violations,
            warnings: prepared.report.warnings,
            plan,
            limit_info: prepared.report.limit_info,
        })
    }

    pub async fn submit(
        &self,
        subject: &Subject,
        req: &SubmitRequest,
    ) -> Result<SubmitResponse, ServiceError> {
        let fetch_size = req
            .fetch_size
            .map(|v| {
                i32::try_from(v).ok().filter(|v| *v > 0).ok_or_else(|| {
                    ServiceError::InvalidRequest("fetch_size out of range".to_string())
                })
            })
            .transpose()?;

        let prepared = self.prepare(subject, &req.sql_text, req.dataset_id.as_deref())?;
        if !prepared.report.executable {
            return Err(ServiceError::Blocked(prepared.report));
        }

        let record = ExecutionRecord {
            execution_id: Ulid::new().to_string(),
            engine: self.defaults.engine.clone(),
            datasource: trimmed(req.datasource.as_deref())
                .unwrap_or_else(|| self.defaults.datasource.clone()),
            catalog: trimmed(req.catalog.as_deref()),
            schema: trimmed(req.schema.as_deref()),
            dataset_id: prepared.dataset.as_ref().map(|d| d.dataset_id.clone()),
            sql_text: req.sql_text.trim().to_string(),
            query_hash: canonical::query_hash(&req.sql_text),
            executed_sql: prepared.executed_sql,
            status: ExecStatus::Pending,
            limit_applied: prepared
                .report
                .limit_info
                .as_ref()
                .is_some_and(|l| l.applied),
            dry_run: req.dry_run.unwrap_or(false),
            fetch_size,
            client_request_id: trimmed(req.client_request_id.as_deref()),
            elapsed_ms: 0,
            rows: 0,
            bytes: 0,
            queue_position: 0,
            remote_job_handle: None,
            result_set_id: None,
            error_message: None,
            submitted_by: subject.principal_id.clone(),
            submitted_at_ms: unix_epoch_ms_now(),
            finished_at_ms: None,
        };

        self.executions.insert_execution(&record).await?;
        crate::metrics::observe_execution_transition(ExecStatus::Pending.as_str());
        tracing::Span::current().record("execution_id", record.execution_id.as_str());
        tracing::info!(
            execution_id = %record.execution_id,
            query_hash = %record.query_hash,
            dataset_id = record.dataset_id.as_deref().unwrap_or(""),
            limit_applied = record.limit_applied,
            "execution accepted"
        );

        Ok(SubmitResponse {
            execution_id: record.execution_id,
            remote_job_handle: record.remote_job_handle,
            accepted: true,
        })
    }

    pub async fn status(&self, execution_id: &str) -> Result<StatusResponse, ServiceError> {
        let record = self
            .executions
            .load_execution(execution_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        Ok(status_view(&record))
    }

    /// Marks the execution CANCELED whatever its state; repeated calls re-stamp `finished_at`.
    pub async fn cancel(&self, execution_id: &str) -> Result<(), ServiceError> {
        let record = self
            .executions
            .cancel_execution(execution_id, unix_epoch_ms_now())
            .await?
            .ok_or(ServiceError::NotFound)?;
        crate::metrics::observe_execution_transition(record.status.as_str());
        tracing::info!(execution_id = %record.execution_id, "execution canceled");
        Ok(())
    }

    /// Progress from the engine backend, applied only while the stored status is `expected`.
    pub async fn apply_backend_update(
        &self,
        execution_id: &str,
        expected: ExecStatus,
        mut update: ProgressUpdate,
    ) -> Result<StatusResponse, ServiceError> {
        if update.status.is_terminal() && update.finished_at_ms.is_none() {
            update.finished_at_ms = Some(unix_epoch_ms_now());
        }
        let record = self
            .executions
            .apply_progress(execution_id, expected, &update)
            .await?;
        crate::metrics::observe_execution_transition(record.status.as_str());
        Ok(status_view(&record))
    }

    pub async fn save_result(
        &self,
        subject: &Subject,
        execution_id: &str,
        ttl_days: Option<u32>,
    ) -> Result<ResultSetView, ServiceError> {
        let execution = self
            .executions
            .load_execution(execution_id)
            .await?
            .filter(|e| e.submitted_by == subject.principal_id)
            .ok_or(ServiceError::NotFound)?;
        if execution.status != ExecStatus::Succeeded {
            return Err(ServiceError::NotSucceeded(execution.status));
        }

        let ttl_days = ttl_days
            .unwrap_or(self.defaults.result_set_ttl_days)
            .clamp(1, i32::MAX as u32);
        let created_at_ms = unix_epoch_ms_now();
        let expires_at_ms =
            created_at_ms.saturating_add(i64::from(ttl_days).saturating_mul(DAY_MS));
        let result_set_id = Ulid::new().to_string();
        let storage_format = StorageFormat::Json;

        let record = ResultSetRecord {
            storage_uri: format!(
                "sqlgate://result-sets/{}.{}",
                result_set_id,
                storage_format.extension()
            ),
            result_set_id,
            owner: subject.principal_id.clone(),
            storage_format,
            columns: projection_columns(&execution.executed_sql),
            row_count: Some(execution.rows),
            ttl_days: ttl_days as i32,
            created_at_ms,
            expires_at_ms,
        };

        self.result_sets
            .attach_result_set(&execution.execution_id, &record)
            .await?;
        tracing::info!(
            execution_id = %execution.execution_id,
            result_set_id = %record.result_set_id,
            ttl_days,
            "result set saved"
        );

        Ok(result_set_view(&record))
    }

    pub async fn list_result_sets(
        &self,
        subject: &Subject,
    ) -> Result<Vec<ResultSetView>, ServiceError> {
        let records = self
            .result_sets
            .list_result_sets(&subject.principal_id)
            .await?;
        Ok(records.iter().map(result_set_view).collect())
    }

    async fn load_owned(
        &self,
        subject: &Subject,
        result_set_id: &str,
    ) -> Result<ResultSetRecord, ServiceError> {
        self.result_sets
            .load_result_set(result_set_id)
            .await?
            .filter(|r| r.owner == subject.principal_id)
            .ok_or(ServiceError::NotFound)
    }

    pub async fn get_result_set(
        &self,
        subject: &Subject,
        result_set_id: &str,
    ) -> Result<ResultSetView, ServiceError> {
        let record = self.load_owned(subject, result_set_id).await?;
        Ok(result_set_view(&record))
    }

    pub async fn delete_result_set(
        &self,
        subject: &Subject,
        result_set_id: &str,
    ) -> Result<(), ServiceError> {
        let record = self.load_owned(subject, result_set_id).await?;
        let report = self
            .result_sets
            .delete_result_set(&record.result_set_id)
            .await?;
        tracing::info!(
            result_set_id = %record.result_set_id,
            detached_executions = report.detached_executions,
            "result set deleted"
        );
        Ok(())
    }

    pub async fn cleanup_expired(
        &self,
        subject: &Subject,
    ) -> Result<CleanupResponse, ServiceError> {
        if !subject.has_any_role(&self.defaults.result_set_admin_roles) {
            return Err(ServiceError::Forbidden(
                "result set cleanup requires an administrator role".to_string(),
            ));
        }

        let report = match self.expiry.run_once().await? {
            SweepOutcome::Completed(report) => report,
            SweepOutcome::Skipped => return Err(ServiceError::SweepInProgress),
        };
        Ok(CleanupResponse {
            deleted: report.deleted(),
            detached_executions: report.detached_executions,
        })
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn status_view(record: &ExecutionRecord) -> StatusResponse {
    StatusResponse {
        execution_id: record.execution_id.clone(),
        status: record.status,
        elapsed_ms: u64::try_from(record.elapsed_ms).ok(),
        rows: u64::try_from(record.rows).ok(),
        bytes: u64::try_from(record.bytes).ok(),
        queue_position: u32::try_from(record.queue_position).ok(),
        error_message: record.error_message.clone(),
        result_set_id: record.result_set_id.clone(),
        plan: None,
    }
}

fn result_set_view(record: &ResultSetRecord) -> ResultSetView {
    ResultSetView {
        result_set_id: record.result_set_id.clone(),
        owner: record.owner.clone(),
        storage_uri: record.storage_uri.clone(),
        storage_format: record.storage_format,
        columns: record.columns.clone(),
        row_count: record.row_count.and_then(|v| u64::try_from(v).ok()),
        ttl_days: u32::try_from(record.ttl_days).unwrap_or(1),
        created_at_ms: record.created_at_ms,
        expires_at_ms: record.expires_at_ms,
    }
}

pub fn unix_epoch_ms_now() -> i64 {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    ms.min(i64::MAX as u128) as i64
}

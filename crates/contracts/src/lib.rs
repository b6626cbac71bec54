use serde::{Deserialize, Serialize};

pub mod canonical;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Pending => "PENDING",
            ExecStatus::Running => "RUNNING",
            ExecStatus::Succeeded => "SUCCEEDED",
            ExecStatus::Failed => "FAILED",
            ExecStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(ExecStatus::Pending),
            "RUNNING" => Some(ExecStatus::Running),
            "SUCCEEDED" | "SUCCESS" => Some(ExecStatus::Succeeded),
            "FAILED" => Some(ExecStatus::Failed),
            "CANCELED" | "CANCELLED" => Some(ExecStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecStatus::Succeeded | ExecStatus::Failed | ExecStatus::Canceled
        )
    }

    /// Transitions the execution backend may apply. Cancellation goes through its own path.
    pub fn can_advance_to(self, next: ExecStatus) -> bool {
        match (self, next) {
            (ExecStatus::Pending, ExecStatus::Running) => true,
            (ExecStatus::Running, ExecStatus::Running) => true,
            (ExecStatus::Pending | ExecStatus::Running, ExecStatus::Succeeded) => true,
            (ExecStatus::Pending | ExecStatus::Running, ExecStatus::Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    EmptySql,
    WriteBlocked,
    MultiStatement,
}

impl ViolationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationCode::EmptySql => "EMPTY_SQL",
            ViolationCode::WriteBlocked => "WRITE_BLOCKED",
            ViolationCode::MultiStatement => "MULTI_STATEMENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
    pub blocking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitInfo {
    pub applied: bool,
    pub limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<u64>,
    pub policy_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateRequest {
    pub sql_text: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub datasource: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub executable: bool,
    pub rewritten_sql: String,
    pub summary: String,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_info: Option<LimitInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    pub sql_text: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub datasource: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub client_request_id: Option<String>,
    #[serde(default)]
    pub fetch_size: Option<u32>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub execution_id: String,
    pub remote_job_handle: Option<String>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub execution_id: String,
    pub status: ExecStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_set_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageFormat {
    Json,
    Csv,
    Parquet,
    Arrow,
}

impl StorageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageFormat::Json => "JSON",
            StorageFormat::Csv => "CSV",
            StorageFormat::Parquet => "PARQUET",
            StorageFormat::Arrow => "ARROW",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "JSON" => Some(StorageFormat::Json),
            "CSV" => Some(StorageFormat::Csv),
            "PARQUET" => Some(StorageFormat::Parquet),
            "ARROW" => Some(StorageFormat::Arrow),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
            StorageFormat::Csv => "csv",
            StorageFormat::Parquet => "parquet",
            StorageFormat::Arrow => "arrow",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveResultRequest {
    #[serde(default)]
    pub ttl_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetView {
    pub result_set_id: String,
    pub owner: String,
    pub storage_uri: String,
    pub storage_format: StorageFormat,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    pub ttl_days: u32,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u64,
    pub detached_executions: u64,
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlgate_ledger::{ExecutionStore, LedgerError, MemoryLedger, PgLedger, ResultSetStore};
use sqlgate_policy::{
    AccessChecker, DatasetMetadataResolver, RoleAccessChecker, SecurityGuardError, SqlValidator,
    Subject, ValidatorPolicy,
};
use tracing::Span;
use ulid::Ulid;

use crate::catalog::JsonCatalog;
use crate::config::{GatewayConfig, StartupError, StoreMode};
use crate::execution::{ExecutionDefaults, ExecutionService, ServiceError};
use crate::expiry::ResultSetExpiryJob;

mod result_sets;
mod sql;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    service: ExecutionService,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

impl AppState {
    pub fn from_parts(
        config: GatewayConfig,
        executions: Arc<dyn ExecutionStore>,
        result_sets: Arc<dyn ResultSetStore>,
        datasets: Arc<dyn DatasetMetadataResolver>,
    ) -> Self {
        let validator = SqlValidator::new(ValidatorPolicy {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            policy_id: config.limit_policy_id.clone(),
        });
        let access: Arc<dyn AccessChecker> =
            Arc::new(RoleAccessChecker::new(config.default_classification));
        let defaults = ExecutionDefaults {
            engine: config.default_engine.clone(),
            datasource: config.default_datasource.clone(),
            result_set_ttl_days: config.result_set_ttl_days,
            result_set_admin_roles: config.result_set_admin_roles.clone(),
        };

        let service = ExecutionService::new(
            validator,
            access,
            datasets,
            executions,
            result_sets,
            defaults,
        );

        Self { config, service }
    }

    pub fn service(&self) -> &ExecutionService {
        &self.service
    }

    pub fn expiry_job(&self) -> ResultSetExpiryJob {
        self.service.expiry_job()
    }
}

pub async fn build_state(config: GatewayConfig) -> Result<AppState, StartupError> {
    let (executions, result_sets): (Arc<dyn ExecutionStore>, Arc<dyn ResultSetStore>) =
        match config.store_mode {
            StoreMode::Postgres => {
                let db_url = config.db_url.as_deref().ok_or_else(|| StartupError {
                    code: "ERR_MISSING_CONFIG",
                    message: "postgres store mode requires SQLGATE_DB_URL".to_string(),
                })?;
                let ledger = PgLedger::connect_and_migrate(
                    db_url,
                    Duration::from_millis(config.ledger_write_timeout_ms),
                )
                .await
                .map_err(|err| StartupError {
                    code: "ERR_LEDGER_UNAVAILABLE",
                    message: format!("failed to initialize ledger: {}", err),
                })?;
                (Arc::new(ledger.clone()), Arc::new(ledger))
            }
            StoreMode::Memory => {
                tracing::warn!("using in-memory store; executions are lost on restart");
                let ledger = MemoryLedger::default();
                (Arc::new(ledger.clone()), Arc::new(ledger))
            }
        };

    let catalog = match config.dataset_catalog_path.as_deref() {
        Some(path) => JsonCatalog::load(path).map_err(|err| StartupError {
            code: "ERR_CATALOG_INVALID",
            message: err.to_string(),
        })?,
        None => JsonCatalog::empty(),
    };
    tracing::info!(datasets = catalog.len(), "dataset catalog loaded");

    Ok(AppState::from_parts(
        config,
        executions,
        result_sets,
        Arc::new(catalog),
    ))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/sql/validate", post(sql::validate))
        .route("/v1/sql/submit", post(sql::submit))
        .route("/v1/sql/executions/{execution_id}", get(sql::status))
        .route("/v1/sql/executions/{execution_id}/cancel", post(sql::cancel))
        .route(
            "/v1/sql/executions/{execution_id}/result-set",
            post(sql::save_result),
        )
        .route("/v1/result-sets", get(result_sets::list))
        .route("/v1/result-sets/cleanup", post(result_sets::cleanup))
        .route(
            "/v1/result-sets/{result_set_id}",
            get(result_sets::fetch).delete(result_sets::remove),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let ledger_ready = state.service.result_sets().ping().await.is_ok();
    checks.insert("ledger", ledger_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_auth
        && let Err(err) = extract_subject(&state, &headers)
    {
        return err.into_response();
    }

    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn extract_subject(state: &AppState, headers: &HeaderMap) -> Result<Subject, ApiError> {
    validate_local_auth_shared_secret(headers, state.config.local_auth_shared_secret.as_deref())?;

    let principal_id = header_str(headers, "x-sqlgate-principal-id").ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "ERR_AUTH_REQUIRED",
            "missing x-sqlgate-principal-id header",
            false,
        )
    })?;

    let roles = header_str(headers, "x-sqlgate-roles")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(Subject::new(principal_id, roles))
}

fn validate_local_auth_shared_secret(
    headers: &HeaderMap,
    expected_secret: Option<&str>,
) -> Result<(), ApiError> {
    let Some(expected_secret) = expected_secret else {
        return Ok(());
    };

    let provided_secret = header_str(headers, "x-sqlgate-local-auth-secret").ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "ERR_AUTH_REQUIRED",
            "missing local auth secret",
            false,
        )
    })?;

    if provided_secret != expected_secret {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "ERR_AUTH_INVALID",
            "invalid local auth secret",
            false,
        ));
    }

    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn extract_request_id(headers: &HeaderMap) -> String {
    header_str(headers, "x-sqlgate-request-id")
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

/// Records latency and outcome on the request span and feeds the HTTP metrics.
fn finish_request<T>(
    route: &'static str,
    method: &'static str,
    span: &Span,
    started: Instant,
    ok_status: StatusCode,
    result: &Result<T, ApiError>,
) {
    span.record("latency_ms", started.elapsed().as_millis() as u64);
    span.record("outcome", if result.is_ok() { "ok" } else { "error" });
    observe_request(route, method, started, ok_status, result);
}

fn observe_request<T>(
    route: &'static str,
    method: &'static str,
    started: Instant,
    ok_status: StatusCode,
    result: &Result<T, ApiError>,
) {
    let status = match result {
        Ok(_) => ok_status,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route, method, status.as_u16(), started.elapsed());
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
            detail: None,
        }),
    )
}

fn invalid_json() -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "invalid JSON body",
        false,
    )
}

fn service_error(err: ServiceError) -> ApiError {
    let message = err.to_string();
    match err {
        ServiceError::InvalidRequest(_) => json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            message,
            false,
        ),
        ServiceError::Blocked(report) => {
            let (status, Json(mut body)) = json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "ERR_SQL_BLOCKED",
                message,
                false,
            );
            body.detail = Some(serde_json::json!({
                "summary": report.summary(),
                "violations": report.violations,
            }));
            (status, Json(body))
        }
        ServiceError::Guard(guard_err) => {
            let status = match guard_err {
                SecurityGuardError::NoClassificationAccess => StatusCode::FORBIDDEN,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            json_error(status, guard_err.code(), message, false)
        }
        ServiceError::DatasetNotFound(_) => json_error(
            StatusCode::NOT_FOUND,
            "ERR_DATASET_NOT_FOUND",
            message,
            false,
        ),
        ServiceError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", "not found", false)
        }
        ServiceError::Forbidden(_) => {
            json_error(StatusCode::FORBIDDEN, "ERR_FORBIDDEN", message, false)
        }
        ServiceError::NotSucceeded(_) => json_error(
            StatusCode::CONFLICT,
            "ERR_EXECUTION_NOT_SUCCEEDED",
            message,
            false,
        ),
        ServiceError::SweepInProgress => json_error(
            StatusCode::CONFLICT,
            "ERR_CLEANUP_IN_PROGRESS",
            message,
            true,
        ),
        ServiceError::Ledger(LedgerError::Conflict { .. }) => {
            json_error(StatusCode::CONFLICT, "ERR_CONFLICT", message, false)
        }
        ServiceError::Ledger(LedgerError::NotFound) => {
            json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", "not found", false)
        }
        ServiceError::Ledger(ledger_err) => {
            tracing::warn!(error = %ledger_err, "ledger operation failed");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "ERR_LEDGER_UNAVAILABLE",
                "execution ledger unavailable",
                true,
            )
        }
    }
}

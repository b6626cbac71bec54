use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use sqlgate_contracts::{
    ResultSetView, SaveResultRequest, StatusResponse, SubmitRequest, SubmitResponse,
    ValidateRequest, ValidateResponse,
};
use tracing::Instrument;

use super::{
    ApiError, AppState, extract_request_id, extract_subject, finish_request, invalid_json,
    observe_request, service_error,
};

pub(super) async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "sql.validate",
        request_id = %request_id,
        principal_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result: Result<Json<ValidateResponse>, ApiError> = async {
        let subject = extract_subject(&state, &headers)?;
        tracing::Span::current().record("principal_id", subject.principal_id.as_str());
        let Json(req) = req.map_err(|_| invalid_json())?;

        let resp = state
            .service
            .validate(&subject, &req)
            .map_err(service_error)?;
        tracing::info!(
            executable = resp.executable,
            violations = resp.violations.len(),
            warnings = resp.warnings.len(),
            "sql validated"
        );
        Ok(Json(resp))
    }
    .instrument(span.clone())
    .await;

    finish_request(
        "/v1/sql/validate",
        "POST",
        &span,
        started,
        StatusCode::OK,
        &result,
    );
    result
}

pub(super) async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "sql.submit",
        request_id = %request_id,
        principal_id = tracing::field::Empty,
        execution_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result: Result<(StatusCode, Json<SubmitResponse>), ApiError> = async {
        let subject = extract_subject(&state, &headers)?;
        tracing::Span::current().record("principal_id", subject.principal_id.as_str());
        let Json(req) = req.map_err(|_| invalid_json())?;

        let resp = state
            .service
            .submit(&subject, &req)
            .await
            .map_err(service_error)?;
        Ok((StatusCode::ACCEPTED, Json(resp)))
    }
    .instrument(span.clone())
    .await;

    finish_request(
        "/v1/sql/submit",
        "POST",
        &span,
        started,
        StatusCode::ACCEPTED,
        &result,
    );
    result
}

pub(super) async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(execution_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let started = Instant::now();

    let result: Result<Json<StatusResponse>, ApiError> = async {
        extract_subject(&state, &headers)?;
        state
            .service
            .status(&execution_id)
            .await
            .map(Json)
            .map_err(service_error)
    }
    .await;

    observe_request(
        "/v1/sql/executions/{execution_id}",
        "GET",
        started,
        StatusCode::OK,
        &result,
    );
    result
}

pub(super) async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(execution_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "sql.cancel",
        request_id = %request_id,
        execution_id = %execution_id,
        principal_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result: Result<StatusCode, ApiError> = async {
        let subject = extract_subject(&state, &headers)?;
        tracing::Span::current().record("principal_id", subject.principal_id.as_str());
        state
            .service
            .cancel(&execution_id)
            .await
            .map_err(service_error)?;
        Ok(StatusCode::NO_CONTENT)
    }
    .instrument(span.clone())
    .await;

    finish_request(
        "/v1/sql/executions/{execution_id}/cancel",
        "POST",
        &span,
        started,
        StatusCode::NO_CONTENT,
        &result,
    );
    result
}

pub(super) async fn save_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(execution_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ResultSetView>), ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "result_set.save",
        request_id = %request_id,
        execution_id = %execution_id,
        principal_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result: Result<(StatusCode, Json<ResultSetView>), ApiError> = async {
        let subject = extract_subject(&state, &headers)?;
        tracing::Span::current().record("principal_id", subject.principal_id.as_str());

        // An empty body means "use the configured TTL".
        let req = if body.iter().all(u8::is_ascii_whitespace) {
            SaveResultRequest::default()
        } else {
            serde_json::from_slice::<SaveResultRequest>(&body).map_err(|_| invalid_json())?
        };

        let view = state
            .service
            .save_result(&subject, &execution_id, req.ttl_days)
            .await
            .map_err(service_error)?;
        Ok((StatusCode::CREATED, Json(view)))
    }
    .instrument(span.clone())
    .await;

    finish_request(
        "/v1/sql/executions/{execution_id}/result-set",
        "POST",
        &span,
        started,
        StatusCode::CREATED,
        &result,
    );
    result
}

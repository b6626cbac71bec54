use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use sqlgate_contracts::{CleanupResponse, ResultSetView};
use tracing::Instrument;

use super::{
    ApiError, AppState, extract_request_id, extract_subject, finish_request, observe_request,
    service_error,
};

pub(super) async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ResultSetView>>, ApiError> {
    let started = Instant::now();
    let result: Result<Json<Vec<ResultSetView>>, ApiError> = async {
        let subject = extract_subject(&state, &headers)?;
        state
            .service
            .list_result_sets(&subject)
            .await
            .map(Json)
            .map_err(service_error)
    }
    .await;

    observe_request("/v1/result-sets", "GET", started, StatusCode::OK, &result);
    result
}

pub(super) async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(result_set_id): Path<String>,
) -> Result<Json<ResultSetView>, ApiError> {
    let started = Instant::now();
    let result: Result<Json<ResultSetView>, ApiError> = async {
        let subject = extract_subject(&state, &headers)?;
        state
            .service
            .get_result_set(&subject, &result_set_id)
            .await
            .map(Json)
            .map_err(service_error)
    }
    .await;

    observe_request(
        "/v1/result-sets/{result_set_id}",
        "GET",
        started,
        StatusCode::OK,
        &result,
    );
    result
}

pub(super) async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(result_set_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "result_set.delete",
        request_id = %request_id,
        result_set_id = %result_set_id,
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
            .delete_result_set(&subject, &result_set_id)
            .await
            .map_err(service_error)?;
        Ok(StatusCode::NO_CONTENT)
    }
    .instrument(span.clone())
    .await;

    finish_request(
        "/v1/result-sets/{result_set_id}",
        "DELETE",
        &span,
        started,
        StatusCode::NO_CONTENT,
        &result,
    );
    result
}

pub(super) async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanupResponse>, ApiError> {
    let request_id = extract_request_id(&headers);
    let span = tracing::info_span!(
        "result_set.cleanup",
        request_id = %request_id,
        principal_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result: Result<Json<CleanupResponse>, ApiError> = async {
        let subject = extract_subject(&state, &headers)?;
        tracing::Span::current().record("principal_id", subject.principal_id.as_str());
        let resp = state
            .service
            .cleanup_expired(&subject)
            .await
            .map_err(service_error)?;
        tracing::info!(
            deleted = resp.deleted,
            detached_executions = resp.detached_executions,
            "manual result set cleanup"
        );
        Ok(Json(resp))
    }
    .instrument(span.clone())
    .await;

    finish_request(
        "/v1/result-sets/cleanup",
        "POST",
        &span,
        started,
        StatusCode::OK,
        &result,
    );
    result
}

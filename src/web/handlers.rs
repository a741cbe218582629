//! HTTP request handlers.

use super::AppState;
use crate::db::DbError;
use crate::events::{CheckResult, Event, HookError};
use crate::state::{HostState, LiveStateUpdate, ServiceState};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Error body returned by the hook endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub retryable: bool,
}

fn hook_error_response(err: HookError) -> Response {
    let status = match &err {
        HookError::Data(_) => StatusCode::BAD_REQUEST,
        HookError::NotFound { .. } => StatusCode::NOT_FOUND,
        HookError::Conflict { .. } => StatusCode::CONFLICT,
        HookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody {
        error: err.to_string(),
        retryable: err.is_retryable(),
    };
    (status, Json(body)).into_response()
}

fn db_error_response(err: DbError) -> Response {
    match err {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
        e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Hooks
// ============================================================================

pub async fn handle_host_livestate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(changes): Json<LiveStateUpdate<HostState>>,
) -> impl IntoResponse {
    match state.dispatcher.dispatch(Event::HostUpdated { id, changes }).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => hook_error_response(e),
    }
}

pub async fn handle_service_livestate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(changes): Json<LiveStateUpdate<ServiceState>>,
) -> impl IntoResponse {
    match state.dispatcher.dispatch(Event::ServiceUpdated { id, changes }).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => hook_error_response(e),
    }
}

pub async fn handle_checkresult(
    State(state): State<AppState>,
    Json(record): Json<CheckResult>,
) -> impl IntoResponse {
    match state.dispatcher.dispatch(Event::CheckResultInserted(record)).await {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(e) => hook_error_response(e),
    }
}

// ============================================================================
// Published entities
// ============================================================================

pub async fn handle_get_host(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_host(id) {
        Ok(host) => Json(host).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_get_host_services(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_host(id) {
        return db_error_response(e);
    }
    match state.store.get_services_for_host(id) {
        Ok(services) => Json(services).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_get_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_service(id) {
        Ok(service) => Json(service).into_response(),
        Err(e) => db_error_response(e),
    }
}

/// Points waiting for re-delivery, oldest first.
pub async fn handle_get_retention(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_retention() {
        Ok(records) => Json(records).into_response(),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// Status
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_status_counts() {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => db_error_response(e),
    }
}

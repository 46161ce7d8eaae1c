//! REST API handlers.
//!
//! Each handler resolves the caller, builds a permission-checked provider
//! view for it and returns the shared JSON envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

use dormant_core::config::DEFAULT_DNS_TTL;
use dormant_core::epoch_secs;
use dormant_provider::wire::{ApiResponse, DesiredCountRequest, ListQuery, MetricRequest, RecordRequest};
use dormant_provider::{DnsZone, ProviderError, ServiceScheduler};

use crate::ApiState;
use crate::auth::Caller;

const DEFAULT_EVENT_LIMIT: usize = 50;

fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::ok(data)).into_response()
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (status, Json(ApiResponse::<()>::err(msg)))
}

fn provider_error(e: ProviderError) -> Response {
    let status = match &e {
        ProviderError::AccessDenied(_) => StatusCode::FORBIDDEN,
        ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
        ProviderError::Conflict(_) => StatusCode::CONFLICT,
        ProviderError::Invalid(_) => StatusCode::BAD_REQUEST,
        ProviderError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        ProviderError::Http { .. } => StatusCode::BAD_GATEWAY,
    };
    if status.is_server_error() {
        warn!(error = %e, "provider call failed");
    }
    error_response(&e.to_string(), status).into_response()
}

fn respond<T: Serialize>(result: Result<T, ProviderError>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(e) => provider_error(e),
    }
}

// ── Worlds ─────────────────────────────────────────────────────

/// GET /api/v1/worlds
pub async fn list_worlds(State(state): State<ApiState>, Caller(caller): Caller) -> Response {
    respond(state.scheduler(&caller).list_worlds().await)
}

/// GET /api/v1/worlds/{id}
pub async fn describe_world(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Response {
    respond(state.scheduler(&caller).describe(&id).await)
}

/// PUT /api/v1/worlds/{id}/desired-count
pub async fn set_desired_count(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(req): Json<DesiredCountRequest>,
) -> Response {
    let scheduler = state.scheduler(&caller);
    let result = match req.expected_revision {
        Some(revision) => {
            scheduler
                .compare_and_set_desired_count(&id, revision, req.count)
                .await
        }
        None => scheduler.set_desired_count(&id, req.count).await,
    };
    respond(result)
}

// ── Metrics ────────────────────────────────────────────────────

/// POST /api/v1/worlds/{id}/metrics
pub async fn put_sample(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(req): Json<MetricRequest>,
) -> Response {
    let epoch = req.epoch.unwrap_or_else(epoch_secs);
    let result = state
        .scheduler(&caller)
        .put_sample(&id, req.utilization, epoch)
        .await;
    match result {
        Ok(()) => (StatusCode::ACCEPTED, Json(ApiResponse::ok("recorded"))).into_response(),
        Err(e) => provider_error(e),
    }
}

/// GET /api/v1/worlds/{id}/metrics?since=
pub async fn list_samples(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    let since = query.since.unwrap_or(0);
    respond(state.scheduler(&caller).recent_samples(&id, since).await)
}

/// GET /api/v1/worlds/{id}/events?limit=
pub async fn list_events(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    respond(state.scheduler(&caller).scale_events(&id, limit).await)
}

// ── DNS ────────────────────────────────────────────────────────

/// GET /api/v1/zones/{zone}/records/{name}
pub async fn get_record(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path((zone, name)): Path<(String, String)>,
) -> Response {
    match state.dns(&caller).get_record(&zone, &name).await {
        Ok(Some(record)) => ok(record),
        Ok(None) => error_response("record not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => provider_error(e),
    }
}

/// PUT /api/v1/zones/{zone}/records/{name}
pub async fn upsert_record(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path((zone, name)): Path<(String, String)>,
    Json(req): Json<RecordRequest>,
) -> Response {
    let ttl = req.ttl.unwrap_or(DEFAULT_DNS_TTL);
    respond(
        state
            .dns(&caller)
            .upsert_record(&zone, &name, &req.address, ttl)
            .await,
    )
}

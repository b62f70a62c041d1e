//! The HTTP edge: conditional REST operations over the plan service, base
//! path `/v1` (§6). Auth, OIDC verification, and Prometheus scraping glue
//! live outside this module's concern — it only wires routes to the
//! service and translates preconditions into HTTP semantics.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;

use crate::error::Error;
use crate::service::PlanService;

pub fn router(service: Arc<PlanService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/plans", post(create_plan))
        .route("/v1/plans/:id", get(get_plan).patch(update_plan).delete(delete_plan))
        .with_state(service)
}

pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || async move { handle.render() }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn etag_header(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn with_etag(status: StatusCode, body: Value, etag: &str) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert("ETag", etag_header(etag));
    response
}

async fn create_plan(State(service): State<Arc<PlanService>>, body: Result<Json<Value>, axum::extract::rejection::JsonRejection>) -> Response {
    let payload = match body {
        Ok(Json(v)) => v,
        Err(e) => return Error::InvalidJson { message: e.to_string() }.into_response(),
    };

    match service.create(payload).await {
        Ok((expanded, tag)) => with_etag(StatusCode::OK, expanded, &tag),
        Err(e) => e.into_response(),
    }
}

async fn get_plan(State(service): State<Arc<PlanService>>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    match service.get(&id).await {
        Ok((expanded, tag)) => {
            if let Some(candidate) = headers.get("If-None-Match").and_then(|h| h.to_str().ok()) {
                if candidate == tag {
                    let mut response = StatusCode::NOT_MODIFIED.into_response();
                    response.headers_mut().insert("ETag", etag_header(&tag));
                    return response;
                }
            }
            with_etag(StatusCode::OK, expanded, &tag)
        }
        Err(e) => e.into_response(),
    }
}

async fn update_plan(
    State(service): State<Arc<PlanService>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let partial = match body {
        Ok(Json(v)) => v,
        Err(e) => return Error::InvalidJson { message: e.to_string() }.into_response(),
    };

    let if_match = headers.get("If-Match").and_then(|h| h.to_str().ok());
    match service.update(&id, partial, if_match).await {
        Ok((expanded, tag)) => with_etag(StatusCode::OK, expanded, &tag),
        Err(e) => e.into_response(),
    }
}

async fn delete_plan(State(service): State<Arc<PlanService>>, Path(id): Path<String>) -> Response {
    match service.delete(&id).await {
        Ok(()) => Json(serde_json::json!({ "status": "deleted" })).into_response(),
        Err(e) => e.into_response(),
    }
}

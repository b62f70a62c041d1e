//! Crate-wide error taxonomy. Mirrors the error codes in the HTTP edge's
//! error body shape and the recovery classes in the design's error table.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid JSON payload: {message}"))]
    InvalidJson { message: String },

    #[snafu(display("document failed schema validation: {message}"))]
    SchemaValidation { message: String },

    #[snafu(display("plan {object_id} already exists"))]
    PlanExists { object_id: String },

    #[snafu(display("plan {object_id} not found"))]
    PlanNotFound { object_id: String },

    #[snafu(display("If-Match header is required for this operation"))]
    EtagRequired,

    #[snafu(display("If-Match does not match the current ETag"))]
    EtagMismatch,

    #[snafu(display("merge failed: {message}"))]
    JsonMergeError { message: String },

    #[snafu(display("cycle detected at node {object_id} during extraction"))]
    CycleDetected { object_id: String },

    #[snafu(display("node store error: {message}"))]
    StorageError { message: String },

    #[snafu(display("node store timed out after {elapsed_ms}ms"))]
    StorageTimeout { elapsed_ms: u64 },

    #[snafu(display("node {object_id} not found in store"))]
    NodeNotFound { object_id: String },

    #[snafu(display("etag cache error: {message}"))]
    RedisError { message: String },

    #[snafu(display("message bus publish failed: {message}"))]
    PublishFailed { message: String },

    #[snafu(display("message bus error: {message}"))]
    RabbitmqError { message: String },
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidJson { .. } => "INVALID_JSON",
            Error::SchemaValidation { .. } => "INVALID_JSON",
            Error::PlanExists { .. } => "PLAN_EXISTS",
            Error::PlanNotFound { .. } => "PLAN_NOT_FOUND",
            Error::EtagRequired => "ETAG_REQUIRED",
            Error::EtagMismatch => "ETAG_NOT_MATCH",
            Error::JsonMergeError { .. } => "JSON_MERGE_ERROR",
            Error::CycleDetected { .. } => "JSON_MERGE_ERROR",
            Error::StorageError { .. } => "STORAGE_ERROR",
            Error::StorageTimeout { .. } => "STORAGE_ERROR",
            Error::NodeNotFound { .. } => "STORAGE_ERROR",
            Error::RedisError { .. } => "REDIS_ERROR",
            Error::PublishFailed { .. } => "RABBITMQ_ERROR",
            Error::RabbitmqError { .. } => "RABBITMQ_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidJson { .. } | Error::SchemaValidation { .. } | Error::JsonMergeError { .. } | Error::CycleDetected { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::PlanExists { .. } => StatusCode::CONFLICT,
            Error::PlanNotFound { .. } | Error::NodeNotFound { .. } => StatusCode::NOT_FOUND,
            Error::EtagRequired => StatusCode::PRECONDITION_REQUIRED,
            Error::EtagMismatch => StatusCode::PRECONDITION_FAILED,
            Error::StorageError { .. }
            | Error::StorageTimeout { .. }
            | Error::RedisError { .. }
            | Error::PublishFailed { .. }
            | Error::RabbitmqError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: &'static str,
    status_code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error_code: self.code(),
            status_code: status.as_u16(),
            message: self.to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Every variant except `ConfigError` is an expected, per-request outcome:
/// it is decided by the stage that detects it and never escalated.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::InvalidBody(rejection) => (
                body_rejection_status(rejection),
                "invalid_body",
                sanitize_json_rejection(rejection),
            ),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            // Never expose configuration details to clients
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.".to_string(),
            ),
        };

        // Client outcomes are expected traffic, not server faults
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = axum::Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response();
        }

        (status, body).into_response()
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(error = %rejection, "Path rejected");
        AppError::BadRequest("Invalid path parameter: expected a UUID".to_string())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(error = %rejection, "Query rejected");
        AppError::BadRequest("Invalid query parameter".to_string())
    }
}

/// Oversized bodies keep 413 and a wrong content type keeps 415; every other
/// body problem is reported as 400.
fn body_rejection_status(rejection: &JsonRejection) -> StatusCode {
    match rejection.status() {
        status @ (StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNSUPPORTED_MEDIA_TYPE) => status,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Turn a JSON extractor rejection into a short, client-facing message.
///
/// Serde messages can contain internal struct/field names, so only the
/// offending field name is kept.
fn sanitize_json_rejection(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Expected request with `Content-Type: application/json`".to_string()
        }
        JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".to_string(),
        JsonRejection::JsonDataError(e) => sanitize_data_error(&e.body_text()),
        _ => "Invalid request body".to_string(),
    }
}

fn sanitize_data_error(msg: &str) -> String {
    if let Some(field) = backticked(msg, "missing field") {
        return format!("Missing required field: {field}");
    }

    if let Some(field) = backticked(msg, "unknown field") {
        return format!("Unknown field: {field}");
    }

    if msg.contains("unknown variant") {
        return "Unsupported value in request body".to_string();
    }

    if msg.contains("invalid type") || msg.contains("invalid value") {
        return "Invalid data type in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Extract the first backtick-quoted word following `marker`.
fn backticked<'a>(msg: &'a str, marker: &str) -> Option<&'a str> {
    let rest = msg.get(msg.find(marker)? + marker.len()..)?;
    let start = rest.find('`')? + 1;
    let len = rest.get(start..)?.find('`')?;
    rest.get(start..start + len)
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

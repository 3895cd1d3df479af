//! Client-facing error envelope
//!
//! Every error leaves the proxy as `{"error":{"message":…,"type":…}}` with a
//! status matched to the type. Upstream failures with a body are passed
//! through verbatim under the upstream's own status code.

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};

/// Errors surfaced to clients.
#[derive(Debug)]
pub enum ApiError {
    /// 401 - missing/invalid API key, bad master secret, no credentials.
    Authentication(String),
    /// 403 - model not in the calling key's allow-list.
    Permission(String),
    /// 429 - token bucket empty.
    RateLimit(String),
    /// 400 - unreadable body, malformed JSON.
    InvalidRequest(String),
    /// 503 - admin surface invoked without a configured master secret.
    Configuration(String),
    /// 404 - key to update or revoke does not exist.
    NotFound(String),
    /// 502 - upstream failure after fallback exhaustion.
    Api(String),
    /// 500 - key persistence failure, anything unexpected.
    Internal(String),
    /// Upstream non-2xx with a body: surfaced with its own status and body.
    UpstreamPassthrough { status: u16, body: String },
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, "authentication_error", msg)
            }
            ApiError::Permission(msg) => (StatusCode::FORBIDDEN, "permission_error", msg),
            ApiError::RateLimit(msg) => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", msg),
            ApiError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg)
            }
            ApiError::Configuration(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "configuration_error", msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found_error", msg),
            ApiError::Api(msg) => (StatusCode::BAD_GATEWAY, "api_error", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::UpstreamPassthrough { .. } => unreachable!("handled in into_response"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response<Body> {
        match self {
            ApiError::UpstreamPassthrough { status, body } => {
                tracing::warn!(status, "surfacing upstream error to client");
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            other => {
                let (status, error_type, message) = other.parts();
                if status.is_server_error() {
                    tracing::error!("{}: {}", error_type, message);
                } else {
                    tracing::debug!("{}: {}", error_type, message);
                }

                let body = serde_json::json!({
                    "error": { "message": message, "type": error_type }
                });
                Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
        }
    }
}

//! API error taxonomy with HTTP mapping, per the error handling design.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("chain broken: client prev_hash {client:?}, server prev_hash {server:?}")]
    ChainBroken {
        client: Option<String>,
        server: Option<String>,
    },

    #[error("hash mismatch: submitted {submitted}, recomputed {recomputed}")]
    HashMismatch { submitted: String, recomputed: String },

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION", msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::ChainBroken { .. } => (StatusCode::BAD_REQUEST, "CHAIN_BROKEN", self.to_string()),
            ApiError::HashMismatch { .. } => (StatusCode::BAD_REQUEST, "HASH_MISMATCH", self.to_string()),
            ApiError::SignatureInvalid => (StatusCode::UNAUTHORIZED, "SIGNATURE_INVALID", self.to_string()),
            ApiError::RateLimited { retry_after_secs } => {
                retry_after = Some(*retry_after_secs);
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", self.to_string())
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: None,
                retry_after,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<veritas_persist::StorageError> for ApiError {
    fn from(e: veritas_persist::StorageError) -> Self {
        use veritas_persist::StorageError;
        match e {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            StorageError::AlreadyExists(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<veritas_persist::events::AdmitError> for ApiError {
    fn from(e: veritas_persist::events::AdmitError) -> Self {
        use veritas_persist::events::AdmitError;
        match e {
            AdmitError::AgentUnknown(id) => ApiError::Unauthorized(format!("unknown agent {id}")),
            AdmitError::AgentRevoked(id) => ApiError::Forbidden(format!("agent {id} is revoked")),
            AdmitError::HashMismatch { submitted, recomputed } => {
                ApiError::HashMismatch { submitted, recomputed }
            }
            AdmitError::SignatureInvalid => ApiError::SignatureInvalid,
            AdmitError::ChainBroken { client, server } => ApiError::ChainBroken { client, server },
            AdmitError::DuplicateEvent(hash) => ApiError::Conflict(format!("duplicate event hash {hash}")),
            AdmitError::Storage(e) => ApiError::from(e),
        }
    }
}

impl From<veritas_core::CoreError> for ApiError {
    fn from(e: veritas_core::CoreError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let response = ApiError::NotFound("agent x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after() {
        let response = ApiError::RateLimited { retry_after_secs: 7 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["retryAfter"], 7);
    }
}

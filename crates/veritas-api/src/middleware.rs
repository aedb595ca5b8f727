//! Tower/axum middleware: request id, tracing, security headers, and the
//! two authentication schemes.

use axum::body::{to_bytes, Body};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::auth::{verify_agent_signature, verify_service_key, AuthenticatedAgent};
use crate::error::ApiError;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const SERVICE_KEY_HEADER: &str = "x-service-key";
pub const AGENT_ID_HEADER: &str = "x-agent-id";
pub const AGENT_TIMESTAMP_HEADER: &str = "x-agent-timestamp";
pub const AGENT_SIGNATURE_HEADER: &str = "x-agent-signature";

/// Require the shared service key on administrative-mutation routes.
pub async fn service_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(SERVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {SERVICE_KEY_HEADER} header")))?;

    if !verify_service_key(&state.config.service_key, presented) {
        return Err(ApiError::Unauthorized("invalid service key".to_string()));
    }

    Ok(next.run(request).await)
}

/// Require a valid agent signature, attaching the authenticated agent to
/// request extensions for handlers to read. Buffers the body (bounded by
/// [`MAX_BODY_BYTES`]) since the signed payload covers the exact bytes sent.
pub async fn agent_signature_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();

    let agent_id = parts
        .headers
        .get(AGENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {AGENT_ID_HEADER} header")))?
        .to_string();
    let timestamp = parts
        .headers
        .get(AGENT_TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing/invalid {AGENT_TIMESTAMP_HEADER} header")))?;
    let signature = parts
        .headers
        .get(AGENT_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {AGENT_SIGNATURE_HEADER} header")))?
        .to_string();

    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Validation(format!("failed to read request body: {e}")))?;

    let authenticated = verify_agent_signature(
        &state.pool,
        parts.method.as_str(),
        parts.uri.path(),
        &body_bytes,
        &agent_id,
        timestamp,
        &signature,
        state.config.signature_timestamp_window_secs,
    )
    .await?;

    let mut request = Request::from_parts(parts, Body::from(body_bytes));
    request.extensions_mut().insert(authenticated);

    Ok(next.run(request).await)
}

/// Fixed-window rate limiting, keyed by the caller's authenticated agent id
/// (falling back to `x-client-id` for service-key-authenticated callers).
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .extensions()
        .get::<AuthenticatedAgent>()
        .map(|a| a.agent_id.clone())
        .or_else(|| {
            request
                .headers()
                .get("x-client-id")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "anonymous".to_string());

    match state.rate_limiter.check(&key) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after_secs) => Err(ApiError::RateLimited { retry_after_secs }),
    }
}

/// Request tracing: one span per request, with latency and status recorded
/// at completion.
pub async fn tracing_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        request_id = %request_id,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = {
        let _enter = span.enter();
        next.run(request).await
    };

    let latency = start.elapsed();
    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        latency_ms = %latency.as_millis(),
        "request completed"
    );

    response
}

/// Stamp every request with a UUID, echoed back in `X-Request-ID`.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("x-request-id", request_id.parse().unwrap());
    response
}

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Restrictive-by-default CORS: explicit origins from `VERITAS_CORS_ORIGINS`
/// (comma-separated), or same-origin only if unset.
pub fn cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::{AllowOrigin, CorsLayer};

    let allow_origin = match std::env::var("VERITAS_CORS_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            let parsed: Vec<axum::http::HeaderValue> =
                origins.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if parsed.is_empty() {
                AllowOrigin::exact("https://localhost".parse().unwrap())
            } else {
                AllowOrigin::list(parsed)
            }
        }
        _ => AllowOrigin::exact("https://localhost".parse().unwrap()),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static(SERVICE_KEY_HEADER),
            header::HeaderName::from_static(AGENT_ID_HEADER),
            header::HeaderName::from_static(AGENT_TIMESTAMP_HEADER),
            header::HeaderName::from_static(AGENT_SIGNATURE_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

#[allow(deprecated)]
pub fn timeout_layer(duration: std::time::Duration) -> tower_http::timeout::TimeoutLayer {
    tower_http::timeout::TimeoutLayer::new(duration)
}

pub fn body_limit_layer(limit: usize) -> tower_http::limit::RequestBodyLimitLayer {
    tower_http::limit::RequestBodyLimitLayer::new(limit)
}

/// Standard security headers on every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("x-content-type-options", "nosniff".parse().unwrap());
    headers.insert("x-frame-options", "DENY".parse().unwrap());
    headers.insert(
        "content-security-policy",
        "default-src 'self'; frame-ancestors 'none'".parse().unwrap(),
    );
    headers.insert("referrer-policy", "strict-origin-when-cross-origin".parse().unwrap());

    response
}

#[cfg(test)]
mod tests {
    #[test]
    fn request_ids_are_unique() {
        let a = uuid::Uuid::new_v4().to_string();
        let b = uuid::Uuid::new_v4().to_string();
        assert_ne!(a, b);
    }
}

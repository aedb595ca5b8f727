//! The two admissible credentials: a shared service key for administrative
//! mutations, and a per-request Ed25519 signature for event appends.

use chrono::Utc;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;
use veritas_core::canonical::canonicalize;
use veritas_core::crypto::verify_hex;
use veritas_persist::agents;

use crate::error::ApiError;

/// Compare a presented service key against the configured one in constant
/// time, so a timing side-channel can't be used to guess it byte-by-byte.
pub fn verify_service_key(configured: &str, presented: &str) -> bool {
    configured.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// An agent that has proven, for this one request, that it holds the
/// private key registered under `agent_id`.
#[derive(Debug, Clone)]
pub struct AuthenticatedAgent {
    pub agent_id: String,
}

/// Verify the three agent-signature headers against `method`, `path`, and
/// the request body. The signed payload is the literal string
/// `METHOD:PATH:BODY_JSON:TIMESTAMP`, where `BODY_JSON` is the body
/// canonicalized the same way events are (empty string if there is none),
/// so the same logical body signs identically regardless of client JSON key
/// ordering.
pub async fn verify_agent_signature(
    pool: &SqlitePool,
    method: &str,
    path: &str,
    body: &[u8],
    agent_id: &str,
    timestamp_secs: i64,
    signature_hex: &str,
    window_secs: i64,
) -> Result<AuthenticatedAgent, ApiError> {
    let now = Utc::now().timestamp();
    if (now - timestamp_secs).abs() > window_secs {
        return Err(ApiError::Unauthorized(format!(
            "timestamp {timestamp_secs} outside the {window_secs}s admission window"
        )));
    }

    let agent = agents::get_by_id(pool, agent_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized(format!("unknown agent {agent_id}")))?;
    if !agent.is_active() {
        return Err(ApiError::Forbidden(format!("agent {agent_id} is revoked")));
    }

    let body_str = if body.is_empty() {
        String::new()
    } else {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::Validation(format!("request body is not valid JSON: {e}")))?;
        let canonical_bytes = canonicalize(&value)?;
        String::from_utf8(canonical_bytes)
            .map_err(|e| ApiError::Internal(format!("canonical body was not valid utf8: {e}")))?
    };
    let payload = format!("{method}:{path}:{body_str}:{timestamp_secs}");

    let valid = verify_hex(signature_hex, payload.as_bytes(), &agent.public_key)
        .map_err(|_| ApiError::SignatureInvalid)?;
    if !valid {
        return Err(ApiError::SignatureInvalid);
    }

    Ok(AuthenticatedAgent {
        agent_id: agent.agent_id,
    })
}

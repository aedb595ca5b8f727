//! Agent identity: a principal identified by an Ed25519 public key.

use crate::crypto::agent_id_from_public_key;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-width lowercase-hex identifier, never a UUID: `sha256_hex(public_key)`.
pub type AgentId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Revoked,
}

/// A registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub public_key: String,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub status: AgentStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        matches!(self.status, AgentStatus::Active)
    }
}

/// Validate a public key is exactly 64 lowercase hex chars (32 raw bytes)
/// and derive the agent identifier from it.
pub fn validate_and_derive_agent_id(public_key_hex: &str) -> CoreResult<AgentId> {
    if public_key_hex.len() != 64 || !public_key_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidPublicKeyLength(public_key_hex.len() / 2));
    }
    if public_key_hex.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(CoreError::InvalidHex(
            "public key must be lowercase hex".to_string(),
        ));
    }
    agent_id_from_public_key(public_key_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(validate_and_derive_agent_id("ab").is_err());
    }

    #[test]
    fn rejects_uppercase() {
        let hex64 = "A".repeat(64);
        assert!(validate_and_derive_agent_id(&hex64).is_err());
    }

    #[test]
    fn derives_sha256_of_raw_bytes() {
        let pk = "11".repeat(32);
        let id = validate_and_derive_agent_id(&pk).unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}

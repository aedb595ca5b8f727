//! Scoped, expiring bearer-token capabilities granted to agents.

use crate::crypto::sha256_hex;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single scope entry value. Most grants just need `true`; a constraint
/// object is reserved for future fine-grained limits (e.g. rate caps) and is
/// passed through unexamined by [`check_permission`] today.
pub type ScopeValue = serde_json::Value;

/// `namespace:verb` → grant, with `namespace:*` matching any verb in that
/// namespace.
pub type Scope = HashMap<String, ScopeValue>;

/// A capability's lifecycle position. `active -> {expired, revoked}` is a
/// DAG with both successor states terminal. This column is a persisted
/// convenience for listing/auditing by status; it is never the authority for
/// whether a capability is usable right now — [`Capability::is_expired`]
/// always recomputes that live from `expires_at`, per the validator
/// requirement that elapsed expiry is invalid regardless of stored status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    Active,
    Expired,
    Revoked,
}

/// A capability token as persisted. The raw bearer token is returned to the
/// caller exactly once, at issuance time, and never stored — only its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: i64,
    pub agent_id: String,
    pub token_hash: String,
    pub scope: Scope,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub status: CapabilityStatus,
}

impl Capability {
    /// `now == expires_at` counts as expired: the upper bound is inclusive.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// A capability is usable exactly while it is neither revoked nor past
    /// its expiry; the boundary instant `now == expires_at` is still valid.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }

    pub fn allows(&self, namespace: &str, verb: &str) -> bool {
        check_permission(&self.scope, namespace, verb)
    }
}

/// Does `scope` grant `namespace:verb`? Checks the exact key first, then the
/// namespace wildcard.
pub fn check_permission(scope: &Scope, namespace: &str, verb: &str) -> bool {
    let exact = format!("{namespace}:{verb}");
    if scope.contains_key(&exact) {
        return true;
    }
    let wildcard = format!("{namespace}:*");
    scope.contains_key(&wildcard)
}

/// Generate a new random bearer token (32 bytes, hex-encoded) and its SHA-256
/// hash. The raw token is what's handed to the caller; the hash is what gets
/// persisted and matched against on every subsequent request.
pub fn generate_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let hash = sha256_hex(&bytes);
    (token, hash)
}

/// Hash a presented bearer token the same way [`generate_token`] does, for
/// lookup against stored `token_hash` values.
pub fn hash_token(token: &str) -> Option<String> {
    let bytes = hex::decode(token).ok()?;
    Some(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn scope(entries: &[(&str, serde_json::Value)]) -> Scope {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn exact_scope_match() {
        let s = scope(&[("tools:read", json!(true))]);
        assert!(check_permission(&s, "tools", "read"));
    }

    #[test]
    fn namespace_wildcard_matches_any_verb() {
        let s = scope(&[("tools:*", json!(true))]);
        assert!(check_permission(&s, "tools", "call"));
        assert!(check_permission(&s, "tools", "list"));
    }

    #[test]
    fn unrelated_namespace_does_not_match() {
        let s = scope(&[("tools:call", json!(true))]);
        assert!(!check_permission(&s, "memory", "write"));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let cap = Capability {
            id: 1,
            agent_id: "a".to_string(),
            token_hash: "h".to_string(),
            scope: scope(&[("tools:*", json!(true))]),
            issued_at: now - Duration::hours(1),
            expires_at: now,
            revoked_at: None,
            status: CapabilityStatus::Active,
        };
        assert!(!cap.is_valid(now));
        assert!(cap.is_valid(now - Duration::seconds(1)));
    }

    #[test]
    fn revoked_capability_is_never_valid() {
        let now = Utc::now();
        let cap = Capability {
            id: 1,
            agent_id: "a".to_string(),
            token_hash: "h".to_string(),
            scope: scope(&[("tools:*", json!(true))]),
            issued_at: now - Duration::hours(1),
            expires_at: now + Duration::hours(1),
            revoked_at: Some(now),
            status: CapabilityStatus::Revoked,
        };
        assert!(!cap.is_valid(now));
    }

    #[test]
    fn token_hash_matches_generated_pair() {
        let (token, hash) = generate_token();
        assert_eq!(hash_token(&token).unwrap(), hash);
    }
}

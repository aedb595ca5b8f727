//! Capability minting, validation, and revocation.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use veritas_core::capability::{self, Capability, CapabilityStatus, Scope};

fn row_to_capability(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Capability> {
    let scope_raw: String = row.try_get("scope")?;
    let scope: Scope = serde_json::from_str(&scope_raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let status_raw: String = row.try_get("status")?;
    let status = match status_raw.as_str() {
        "active" => CapabilityStatus::Active,
        "expired" => CapabilityStatus::Expired,
        "revoked" => CapabilityStatus::Revoked,
        other => return Err(StorageError::Internal(format!("unknown capability status {other}"))),
    };
    Ok(Capability {
        id: row.try_get("id")?,
        agent_id: row.try_get("agent_id")?,
        token_hash: row.try_get("token_hash")?,
        scope,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        status,
    })
}

/// Mint a capability; returns the stored record plus the plaintext bearer
/// token, which is never persisted and cannot be recovered afterward.
pub async fn mint(
    pool: &SqlitePool,
    agent_id: &str,
    scope: &Scope,
    issued_by: &str,
    expires_at: DateTime<Utc>,
) -> StorageResult<(Capability, String)> {
    let (token, token_hash) = capability::generate_token();
    let now = Utc::now();
    let scope_json = serde_json::to_string(scope).map_err(|e| StorageError::Serialization(e.to_string()))?;

    let id = sqlx::query(
        "INSERT INTO capabilities (agent_id, token_hash, scope, issued_by, issued_at, expires_at, revoked_at, status)
         VALUES (?, ?, ?, ?, ?, ?, NULL, 'active')",
    )
    .bind(agent_id)
    .bind(&token_hash)
    .bind(&scope_json)
    .bind(issued_by)
    .bind(now)
    .bind(expires_at)
    .execute(pool)
    .await?
    .last_insert_rowid();

    let row = sqlx::query("SELECT * FROM capabilities WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok((row_to_capability(&row)?, token))
}

/// Outcome of presenting a bearer token.
pub enum Validation {
    Valid(Capability),
    Invalid(&'static str),
}

/// Look up a capability by the raw bearer token and report why it's unusable
/// if it is.
pub async fn validate(pool: &SqlitePool, token: &str) -> StorageResult<Validation> {
    let Some(hash) = capability::hash_token(token) else {
        return Ok(Validation::Invalid("malformed token"));
    };
    let row = sqlx::query("SELECT * FROM capabilities WHERE token_hash = ?")
        .bind(&hash)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(Validation::Invalid("not found"));
    };
    let cap = row_to_capability(&row)?;
    let now = Utc::now();
    if cap.is_revoked() {
        return Ok(Validation::Invalid("revoked"));
    }
    if cap.is_expired(now) {
        return Ok(Validation::Invalid("expired"));
    }
    Ok(Validation::Valid(cap))
}

/// Enumerate the agent's active, non-expired capabilities and check whether
/// any grants `namespace:verb`.
pub async fn check_permission(
    pool: &SqlitePool,
    agent_id: &str,
    namespace: &str,
    verb: &str,
) -> StorageResult<bool> {
    let now = Utc::now();
    let rows = sqlx::query(
        "SELECT * FROM capabilities WHERE agent_id = ? AND revoked_at IS NULL AND expires_at > ?",
    )
    .bind(agent_id)
    .bind(now)
    .fetch_all(pool)
    .await?;

    for row in &rows {
        let cap = row_to_capability(row)?;
        if cap.allows(namespace, verb) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// List capabilities, optionally scoped to one agent and/or restricted to
/// those currently active (neither revoked nor expired).
pub async fn list(
    pool: &SqlitePool,
    agent_id: Option<&str>,
    active_only: bool,
) -> StorageResult<Vec<Capability>> {
    let mut sql = String::from("SELECT * FROM capabilities WHERE 1=1");
    if agent_id.is_some() {
        sql.push_str(" AND agent_id = ?");
    }
    if active_only {
        sql.push_str(" AND revoked_at IS NULL AND expires_at > ?");
    }
    sql.push_str(" ORDER BY issued_at DESC");

    let mut q = sqlx::query(&sql);
    if let Some(agent_id) = agent_id {
        q = q.bind(agent_id);
    }
    if active_only {
        q = q.bind(Utc::now());
    }

    let rows = q.fetch_all(pool).await?;
    rows.iter().map(row_to_capability).collect()
}

pub async fn revoke(pool: &SqlitePool, id: i64) -> StorageResult<Capability> {
    let row = sqlx::query("SELECT * FROM capabilities WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("capability {id}")))?;
    let cap = row_to_capability(&row)?;
    if cap.is_revoked() {
        return Err(StorageError::AlreadyExists(format!("capability {id} already revoked")));
    }
    sqlx::query("UPDATE capabilities SET revoked_at = ?, status = 'revoked' WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    let row = sqlx::query("SELECT * FROM capabilities WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    row_to_capability(&row)
}

/// Transition every `active` capability whose `expires_at` has elapsed to
/// `expired`. Meant to be invoked periodically (see the background task in
/// `veritas-server`) and from the admin sweep route; [`Capability::is_expired`]
/// already treats an elapsed `expires_at` as invalid regardless of this
/// column; the sweep keeps the stored status from lagging behind reality for
/// listings and audits. Returns the actual number of rows transitioned.
pub async fn sweep(pool: &SqlitePool) -> StorageResult<u64> {
    let result = sqlx::query(
        "UPDATE capabilities SET status = 'expired' WHERE status = 'active' AND expires_at <= ?",
    )
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

//! Agent registry: register, look up, revoke.

use crate::error::{StorageError, StorageResult};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use veritas_core::agent::{validate_and_derive_agent_id, Agent, AgentStatus};

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Agent> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "active" => AgentStatus::Active,
        "revoked" => AgentStatus::Revoked,
        other => return Err(StorageError::Internal(format!("unknown agent status {other}"))),
    };
    let metadata_raw: String = row.try_get("metadata")?;
    Ok(Agent {
        agent_id: row.try_get("agent_id")?,
        public_key: row.try_get("public_key")?,
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        status,
        metadata: serde_json::from_str(&metadata_raw)
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        created_at: row.try_get("created_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

/// Register a new agent. `public_key` must be unique and is the sole input
/// to the derived `agent_id`.
pub async fn register(
    pool: &SqlitePool,
    public_key: &str,
    name: Option<&str>,
    owner: Option<&str>,
    metadata: serde_json::Value,
) -> StorageResult<Agent> {
    let agent_id = validate_and_derive_agent_id(public_key)?;
    let now = Utc::now();
    let metadata_json = serde_json::to_string(&metadata).map_err(|e| StorageError::Serialization(e.to_string()))?;

    let result = sqlx::query(
        "INSERT INTO agents (agent_id, public_key, name, owner, status, metadata, created_at, revoked_at)
         VALUES (?, ?, ?, ?, 'active', ?, ?, NULL)",
    )
    .bind(&agent_id)
    .bind(public_key)
    .bind(name)
    .bind(owner)
    .bind(&metadata_json)
    .bind(now)
    .execute(pool)
    .await;

    if let Err(sqlx::Error::Database(db_err)) = &result {
        if db_err.is_unique_violation() {
            return Err(StorageError::AlreadyExists(format!(
                "agent with public key {public_key} already registered"
            )));
        }
    }
    result.map_err(StorageError::from)?;

    get_by_id(pool, &agent_id).await?.ok_or_else(|| {
        StorageError::Internal("agent vanished immediately after insert".to_string())
    })
}

pub async fn get_by_id(pool: &SqlitePool, agent_id: &str) -> StorageResult<Option<Agent>> {
    let row = sqlx::query("SELECT * FROM agents WHERE agent_id = ?")
        .bind(agent_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_agent).transpose()
}

/// Revoke an agent, merging `reason` into its metadata if given. Terminal:
/// revoking an already-revoked agent is rejected rather than silently
/// repeated.
pub async fn revoke(pool: &SqlitePool, agent_id: &str, reason: Option<&str>) -> StorageResult<Agent> {
    let agent = get_by_id(pool, agent_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("agent {agent_id}")))?;
    if !agent.is_active() {
        return Err(StorageError::AlreadyExists(format!("agent {agent_id} already revoked")));
    }

    let metadata = if let Some(reason) = reason {
        let mut metadata = agent.metadata.clone();
        if let serde_json::Value::Object(map) = &mut metadata {
            map.insert("revocation_reason".to_string(), serde_json::Value::String(reason.to_string()));
        }
        Some(serde_json::to_string(&metadata).map_err(|e| StorageError::Serialization(e.to_string()))?)
    } else {
        None
    };

    if let Some(metadata_json) = metadata {
        sqlx::query("UPDATE agents SET status = 'revoked', revoked_at = ?, metadata = ? WHERE agent_id = ?")
            .bind(Utc::now())
            .bind(&metadata_json)
            .bind(agent_id)
            .execute(pool)
            .await?;
    } else {
        sqlx::query("UPDATE agents SET status = 'revoked', revoked_at = ? WHERE agent_id = ?")
            .bind(Utc::now())
            .bind(agent_id)
            .execute(pool)
            .await?;
    }

    get_by_id(pool, agent_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("agent {agent_id}")))
}

pub async fn list(
    pool: &SqlitePool,
    status: Option<AgentStatus>,
    owner: Option<&str>,
    limit: i64,
    offset: i64,
) -> StorageResult<Vec<Agent>> {
    let mut sql = String::from("SELECT * FROM agents WHERE 1=1");
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if owner.is_some() {
        sql.push_str(" AND owner = ?");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

    let mut q = sqlx::query(&sql);
    if let Some(status) = status {
        q = q.bind(match status {
            AgentStatus::Active => "active",
            AgentStatus::Revoked => "revoked",
        });
    }
    if let Some(owner) = owner {
        q = q.bind(owner);
    }
    q = q.bind(limit).bind(offset);

    let rows = q.fetch_all(pool).await?;
    rows.iter().map(row_to_agent).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect, SqliteConfig};
    use serde_json::json;

    async fn memory_pool() -> SqlitePool {
        connect(&SqliteConfig::memory()).await.unwrap()
    }

    #[tokio::test]
    async fn duplicate_public_key_is_rejected() {
        let pool = memory_pool().await;
        let pk = "33".repeat(32);
        register(&pool, &pk, Some("a"), None, json!({})).await.unwrap();
        let err = register(&pool, &pk, Some("a-again"), None, json!({})).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn revoking_merges_reason_into_metadata() {
        let pool = memory_pool().await;
        let agent = register(&pool, &"44".repeat(32), Some("a"), None, json!({"env": "prod"}))
            .await
            .unwrap();

        let revoked = revoke(&pool, &agent.agent_id, Some("key compromised")).await.unwrap();
        assert_eq!(revoked.status, AgentStatus::Revoked);
        assert_eq!(revoked.metadata["env"], json!("prod"));
        assert_eq!(revoked.metadata["revocation_reason"], json!("key compromised"));
    }

    #[tokio::test]
    async fn revoking_an_already_revoked_agent_is_rejected() {
        let pool = memory_pool().await;
        let agent = register(&pool, &"55".repeat(32), Some("a"), None, json!({})).await.unwrap();
        revoke(&pool, &agent.agent_id, None).await.unwrap();
        let err = revoke(&pool, &agent.agent_id, None).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }
}

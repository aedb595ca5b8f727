//! The event ledger: admission pipeline, chain loading, and queries.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use veritas_core::event::{self, AdmissionError, Event, EventSubmission, EventType};

fn event_type_str(t: EventType) -> &'static str {
    match t {
        EventType::InputReceived => "input_received",
        EventType::DecisionMade => "decision_made",
        EventType::ToolCallRequested => "tool_call_requested",
        EventType::ToolCallResult => "tool_call_result",
        EventType::ResponseEmitted => "response_emitted",
        EventType::MemoryCreated => "memory_created",
        EventType::MemoryUpdated => "memory_updated",
        EventType::CapabilityGranted => "capability_granted",
        EventType::CapabilityRevoked => "capability_revoked",
        EventType::PolicyViolation => "policy_violation",
        EventType::ErrorOccurred => "error_occurred",
        EventType::SystemEvent => "system_event",
    }
}

fn parse_event_type(s: &str) -> StorageResult<EventType> {
    Ok(match s {
        "input_received" => EventType::InputReceived,
        "decision_made" => EventType::DecisionMade,
        "tool_call_requested" => EventType::ToolCallRequested,
        "tool_call_result" => EventType::ToolCallResult,
        "response_emitted" => EventType::ResponseEmitted,
        "memory_created" => EventType::MemoryCreated,
        "memory_updated" => EventType::MemoryUpdated,
        "capability_granted" => EventType::CapabilityGranted,
        "capability_revoked" => EventType::CapabilityRevoked,
        "policy_violation" => EventType::PolicyViolation,
        "error_occurred" => EventType::ErrorOccurred,
        "system_event" => EventType::SystemEvent,
        other => return Err(StorageError::Internal(format!("unknown event_type {other}"))),
    })
}

fn row_to_event(row: &SqliteRow) -> StorageResult<Event> {
    let event_type: String = row.try_get("event_type")?;
    let payload_raw: String = row.try_get("payload")?;
    let correlation_id: Option<String> = row.try_get("correlation_id")?;
    Ok(Event {
        id: row.try_get("id")?,
        agent_id: row.try_get("agent_id")?,
        event_type: parse_event_type(&event_type)?,
        timestamp: row.try_get("timestamp")?,
        prev_hash: row.try_get("prev_hash")?,
        payload: serde_json::from_str(&payload_raw).map_err(|e| StorageError::Serialization(e.to_string()))?,
        correlation_id: correlation_id
            .map(|s| uuid::Uuid::parse_str(&s).map_err(|e| StorageError::Serialization(e.to_string())))
            .transpose()?,
        hash: row.try_get("hash")?,
        signature: row.try_get("signature")?,
    })
}

/// Everything that can keep an [`EventSubmission`] from being admitted.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("agent {0} is unknown")]
    AgentUnknown(String),
    #[error("agent {0} is revoked")]
    AgentRevoked(String),
    #[error("hash mismatch: submitted {submitted}, recomputed {recomputed}")]
    HashMismatch { submitted: String, recomputed: String },
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("chain broken: client prev_hash {client:?}, server prev_hash {server:?}")]
    ChainBroken {
        client: Option<String>,
        server: Option<String>,
    },
    #[error("duplicate event hash {0}")]
    DuplicateEvent(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<AdmissionError> for AdmitError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::AgentUnknown(a) => AdmitError::AgentUnknown(a),
            AdmissionError::AgentRevoked(a) => AdmitError::AgentRevoked(a),
            AdmissionError::HashMismatch { submitted, recomputed } => {
                AdmitError::HashMismatch { submitted, recomputed }
            }
            AdmissionError::SignatureInvalid => AdmitError::SignatureInvalid,
            AdmissionError::ChainBroken { client, server } => AdmitError::ChainBroken { client, server },
            AdmissionError::Core(e) => AdmitError::Storage(StorageError::Core(e)),
        }
    }
}

/// Run the full admission pipeline (agent lookup, link resolution, hash
/// check, signature check, chain check, atomic insert) inside a single
/// `BEGIN IMMEDIATE` transaction. SQLite has no row-level lock; taking the
/// write lock for the whole pipeline is what makes concurrent admissions for
/// the same agent serialize on the chain check instead of racing each other.
pub async fn admit(
    pool: &SqlitePool,
    submission: &EventSubmission,
    public_key_hex: &str,
    server_timestamp: DateTime<Utc>,
) -> Result<Event, AdmitError> {
    let mut conn = pool.acquire().await.map_err(StorageError::from)?;
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(StorageError::from)?;

    let outcome = admit_locked(&mut conn, submission, public_key_hex, server_timestamp).await;

    let finalizer = if outcome.is_ok() { "COMMIT" } else { "ROLLBACK" };
    sqlx::query(finalizer)
        .execute(&mut *conn)
        .await
        .map_err(StorageError::from)?;

    outcome
}

async fn admit_locked(
    conn: &mut sqlx::sqlite::SqliteConnection,
    submission: &EventSubmission,
    public_key_hex: &str,
    server_timestamp: DateTime<Utc>,
) -> Result<Event, AdmitError> {
    let agent_row = sqlx::query("SELECT status FROM agents WHERE agent_id = ?")
        .bind(&submission.agent_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(StorageError::from)?
        .ok_or_else(|| AdmitError::AgentUnknown(submission.agent_id.clone()))?;

    let status: String = agent_row.try_get("status").map_err(StorageError::from)?;
    if status != "active" {
        return Err(AdmitError::AgentRevoked(submission.agent_id.clone()));
    }

    let last = sqlx::query("SELECT hash FROM events WHERE agent_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1")
        .bind(&submission.agent_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(StorageError::from)?;
    let resolved_prev_hash: Option<String> = last
        .map(|row| row.try_get::<String, _>("hash"))
        .transpose()
        .map_err(StorageError::from)?;

    let event = event::admit(submission, resolved_prev_hash, public_key_hex, server_timestamp)?;

    let correlation_id = event.correlation_id.map(|u| u.to_string());
    let payload_json =
        serde_json::to_string(&event.payload).map_err(|e| StorageError::Serialization(e.to_string()))?;

    let insert = sqlx::query(
        "INSERT INTO events (agent_id, event_type, timestamp, prev_hash, hash, payload, correlation_id, signature)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.agent_id)
    .bind(event_type_str(event.event_type))
    .bind(event.timestamp)
    .bind(&event.prev_hash)
    .bind(&event.hash)
    .bind(&payload_json)
    .bind(&correlation_id)
    .bind(&event.signature)
    .execute(&mut *conn)
    .await;

    let id = match insert {
        Ok(result) => result.last_insert_rowid(),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(AdmitError::DuplicateEvent(event.hash));
        }
        Err(e) => return Err(StorageError::from(e).into()),
    };

    Ok(Event { id, ..event })
}

pub async fn get_by_id(pool: &SqlitePool, id: i64) -> StorageResult<Option<Event>> {
    let row = sqlx::query("SELECT * FROM events WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_event).transpose()
}

pub async fn get_by_hash(pool: &SqlitePool, hash: &str) -> StorageResult<Option<Event>> {
    let row = sqlx::query("SELECT * FROM events WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_event).transpose()
}

/// Filters for [`query`]; all fields optional, ANDed together.
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    pub agent_id: Option<String>,
    pub event_type: Option<EventType>,
    pub correlation_id: Option<uuid::Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Query events matching `filter`, newest first, with `limit`/`offset`.
pub async fn query(
    pool: &SqlitePool,
    filter: &EventFilter,
    limit: i64,
    offset: i64,
) -> StorageResult<Vec<Event>> {
    let mut sql = String::from("SELECT * FROM events WHERE 1=1");
    if filter.agent_id.is_some() {
        sql.push_str(" AND agent_id = ?");
    }
    if filter.event_type.is_some() {
        sql.push_str(" AND event_type = ?");
    }
    if filter.correlation_id.is_some() {
        sql.push_str(" AND correlation_id = ?");
    }
    if filter.since.is_some() {
        sql.push_str(" AND timestamp >= ?");
    }
    if filter.until.is_some() {
        sql.push_str(" AND timestamp <= ?");
    }
    sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

    let mut q = sqlx::query(&sql);
    if let Some(agent_id) = &filter.agent_id {
        q = q.bind(agent_id);
    }
    if let Some(event_type) = filter.event_type {
        q = q.bind(event_type_str(event_type));
    }
    if let Some(correlation_id) = &filter.correlation_id {
        q = q.bind(correlation_id.to_string());
    }
    if let Some(since) = filter.since {
        q = q.bind(since);
    }
    if let Some(until) = filter.until {
        q = q.bind(until);
    }
    q = q.bind(limit).bind(offset);

    let rows = q.fetch_all(pool).await?;
    rows.iter().map(row_to_event).collect()
}

pub async fn count(pool: &SqlitePool, filter: &EventFilter) -> StorageResult<i64> {
    let mut sql = String::from("SELECT COUNT(*) AS n FROM events WHERE 1=1");
    if filter.agent_id.is_some() {
        sql.push_str(" AND agent_id = ?");
    }
    if filter.event_type.is_some() {
        sql.push_str(" AND event_type = ?");
    }
    if filter.correlation_id.is_some() {
        sql.push_str(" AND correlation_id = ?");
    }
    if filter.since.is_some() {
        sql.push_str(" AND timestamp >= ?");
    }
    if filter.until.is_some() {
        sql.push_str(" AND timestamp <= ?");
    }

    let mut q = sqlx::query(&sql);
    if let Some(agent_id) = &filter.agent_id {
        q = q.bind(agent_id);
    }
    if let Some(event_type) = filter.event_type {
        q = q.bind(event_type_str(event_type));
    }
    if let Some(correlation_id) = &filter.correlation_id {
        q = q.bind(correlation_id.to_string());
    }
    if let Some(since) = filter.since {
        q = q.bind(since);
    }
    if let Some(until) = filter.until {
        q = q.bind(until);
    }

    let row = q.fetch_one(pool).await?;
    Ok(row.try_get::<i64, _>("n")?)
}

/// Load an agent's full chain, chronologically ascending, for verification.
pub async fn load_chain(pool: &SqlitePool, agent_id: &str) -> StorageResult<Vec<Event>> {
    let rows = sqlx::query("SELECT * FROM events WHERE agent_id = ? ORDER BY timestamp ASC, id ASC")
        .bind(agent_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_event).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents;
    use crate::db::{connect, SqliteConfig};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;
    use veritas_core::crypto::{agent_id_from_public_key, sha256_hex, sign};

    async fn memory_pool() -> SqlitePool {
        connect(&SqliteConfig::memory()).await.unwrap()
    }

    struct TestAgent {
        sk: SigningKey,
        pk_hex: String,
        agent_id: String,
    }

    async fn registered_agent(pool: &SqlitePool) -> TestAgent {
        let sk = SigningKey::generate(&mut OsRng);
        let pk_hex = hex::encode(sk.verifying_key().to_bytes());
        let agent_id = agent_id_from_public_key(&pk_hex).unwrap();
        agents::register(pool, &pk_hex, Some("agent a"), None, json!({}))
            .await
            .unwrap();
        TestAgent { sk, pk_hex, agent_id }
    }

    fn build_submission(
        agent: &TestAgent,
        event_type: EventType,
        prev_hash: Option<String>,
        payload: serde_json::Value,
    ) -> EventSubmission {
        let unsigned = event::UnsignedEvent {
            agent_id: agent.agent_id.clone(),
            event_type,
            timestamp: Utc::now(),
            prev_hash,
            payload,
            correlation_id: None,
        };
        let bytes = unsigned.canonical_bytes().unwrap();
        let hash = sha256_hex(&bytes);
        let signature = hex::encode(sign(&bytes, &agent.sk));
        EventSubmission {
            agent_id: unsigned.agent_id,
            event_type: unsigned.event_type,
            timestamp: Some(unsigned.timestamp),
            prev_hash: unsigned.prev_hash,
            payload: unsigned.payload,
            correlation_id: unsigned.correlation_id,
            hash,
            signature,
        }
    }

    /// Scenario: happy chain of three (spec end-to-end scenario 1).
    #[tokio::test]
    async fn happy_chain_of_three_admits_in_order() {
        let pool = memory_pool().await;
        let agent = registered_agent(&pool).await;

        let s1 = build_submission(&agent, EventType::InputReceived, None, json!({"i": 1}));
        let e1 = admit(&pool, &s1, &agent.pk_hex, Utc::now()).await.unwrap();

        let s2 = build_submission(&agent, EventType::DecisionMade, Some(e1.hash.clone()), json!({"i": 2}));
        let e2 = admit(&pool, &s2, &agent.pk_hex, Utc::now()).await.unwrap();

        let s3 = build_submission(
            &agent,
            EventType::ResponseEmitted,
            Some(e2.hash.clone()),
            json!({"i": 3}),
        );
        let e3 = admit(&pool, &s3, &agent.pk_hex, Utc::now()).await.unwrap();

        let chain = load_chain(&pool, &agent.agent_id).await.unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.last().unwrap().hash, e3.hash);

        let verification = event::verify_chain(&chain, &agent.pk_hex);
        assert!(verification.valid);
        assert_eq!(verification.total_events, 3);
    }

    /// Scenario: replay rejection (spec end-to-end scenario 2).
    #[tokio::test]
    async fn replaying_the_same_submission_is_rejected_as_duplicate() {
        let pool = memory_pool().await;
        let agent = registered_agent(&pool).await;

        let s1 = build_submission(&agent, EventType::InputReceived, None, json!({"i": 1}));
        admit(&pool, &s1, &agent.pk_hex, Utc::now()).await.unwrap();

        let s2 = build_submission(&agent, EventType::DecisionMade, Some(s1.hash.clone()), json!({"i": 2}));
        admit(&pool, &s2, &agent.pk_hex, Utc::now()).await.unwrap();

        let err = admit(&pool, &s2, &agent.pk_hex, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AdmitError::DuplicateEvent(_)));

        let chain = load_chain(&pool, &agent.agent_id).await.unwrap();
        assert_eq!(chain.len(), 2);
    }

    /// Scenario: tamper detection (spec end-to-end scenario 3).
    #[tokio::test]
    async fn verify_chain_catches_a_directly_mutated_payload() {
        let pool = memory_pool().await;
        let agent = registered_agent(&pool).await;

        let s1 = build_submission(&agent, EventType::InputReceived, None, json!({"i": 1}));
        admit(&pool, &s1, &agent.pk_hex, Utc::now()).await.unwrap();
        let s2 = build_submission(&agent, EventType::DecisionMade, Some(s1.hash.clone()), json!({"i": 2}));
        admit(&pool, &s2, &agent.pk_hex, Utc::now()).await.unwrap();
        let s3 = build_submission(&agent, EventType::ResponseEmitted, Some(s2.hash.clone()), json!({"i": 3}));
        admit(&pool, &s3, &agent.pk_hex, Utc::now()).await.unwrap();

        // bypass the append-only trigger's intent by mutating payload directly,
        // simulating storage-level tampering the trigger is meant to prevent
        sqlx::query("DROP TRIGGER events_no_update").execute(&pool).await.unwrap();
        sqlx::query("UPDATE events SET payload = ? WHERE agent_id = ? AND payload = ?")
            .bind(json!({"i": 99}).to_string())
            .bind(&agent.agent_id)
            .bind(json!({"i": 2}).to_string())
            .execute(&pool)
            .await
            .unwrap();

        let chain = load_chain(&pool, &agent.agent_id).await.unwrap();
        let verification = event::verify_chain(&chain, &agent.pk_hex);
        assert!(!verification.valid);
        assert_eq!(verification.first_invalid_event, Some(1));
    }

    /// Scenario: wrong-key rejection (spec end-to-end scenario 4).
    #[tokio::test]
    async fn signing_with_a_different_agents_key_is_rejected_and_not_persisted() {
        let pool = memory_pool().await;
        let agent_a = registered_agent(&pool).await;
        let agent_b = registered_agent(&pool).await;

        // claims to be A (so the hash checks out) but is actually signed with B's key
        let unsigned = event::UnsignedEvent {
            agent_id: agent_a.agent_id.clone(),
            event_type: EventType::InputReceived,
            timestamp: Utc::now(),
            prev_hash: None,
            payload: json!({"i": 1}),
            correlation_id: None,
        };
        let bytes = unsigned.canonical_bytes().unwrap();
        let forged = EventSubmission {
            agent_id: unsigned.agent_id,
            event_type: unsigned.event_type,
            timestamp: Some(unsigned.timestamp),
            prev_hash: unsigned.prev_hash,
            payload: unsigned.payload,
            correlation_id: unsigned.correlation_id,
            hash: sha256_hex(&bytes),
            signature: hex::encode(sign(&bytes, &agent_b.sk)),
        };

        let err = admit(&pool, &forged, &agent_a.pk_hex, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AdmitError::SignatureInvalid));

        let chain = load_chain(&pool, &agent_a.agent_id).await.unwrap();
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn empty_chain_verifies_as_vacuously_valid() {
        let pool = memory_pool().await;
        let agent = registered_agent(&pool).await;
        let chain = load_chain(&pool, &agent.agent_id).await.unwrap();
        let verification = event::verify_chain(&chain, &agent.pk_hex);
        assert!(verification.valid);
        assert_eq!(verification.total_events, 0);
    }
}

//! Reputation storage: load, apply an outcome, update a domain score.

use crate::error::{StorageError, StorageResult};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use veritas_core::reputation::{self, Outcome, OutcomeType, Reputation};

fn outcome_type_str(t: OutcomeType) -> &'static str {
    match t {
        OutcomeType::Success => "success",
        OutcomeType::PartialSuccess => "partial_success",
        OutcomeType::Failure => "failure",
        OutcomeType::UserCorrected => "user_corrected",
        OutcomeType::Harmful => "harmful",
    }
}

fn parse_outcome_type(s: &str) -> StorageResult<OutcomeType> {
    Ok(match s {
        "success" => OutcomeType::Success,
        "partial_success" => OutcomeType::PartialSuccess,
        "failure" => OutcomeType::Failure,
        "user_corrected" => OutcomeType::UserCorrected,
        "harmful" => OutcomeType::Harmful,
        other => return Err(StorageError::Internal(format!("unknown outcome_type {other}"))),
    })
}

fn row_to_reputation(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Reputation> {
    let breakdown_raw: String = row.try_get("breakdown")?;
    Ok(Reputation {
        agent_id: row.try_get("agent_id")?,
        overall_score: row.try_get("overall_score")?,
        total_actions: row.try_get::<i64, _>("total_actions")? as u64,
        success_rate: row.try_get("success_rate")?,
        failure_rate: row.try_get("failure_rate")?,
        harmful_actions: row.try_get::<i64, _>("harmful_actions")? as u64,
        user_corrections: row.try_get::<i64, _>("user_corrections")? as u64,
        breakdown: serde_json::from_str(&breakdown_raw).map_err(|e| StorageError::Serialization(e.to_string()))?,
        last_updated: row.try_get("last_updated")?,
    })
}

pub async fn get(pool: &SqlitePool, agent_id: &str) -> StorageResult<Option<Reputation>> {
    let row = sqlx::query("SELECT * FROM reputation WHERE agent_id = ?")
        .bind(agent_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_reputation).transpose()
}

/// Apply one outcome: append the [`Outcome`] record, then update the
/// agent's [`Reputation`] row by the pure in-memory update logic, persisting
/// the new totals.
pub async fn record_outcome(
    pool: &SqlitePool,
    agent_id: &str,
    event_id: i64,
    outcome_type: OutcomeType,
    reporter: &str,
    impact: Option<f64>,
    details: Option<serde_json::Value>,
) -> StorageResult<(Outcome, Reputation)> {
    let mut rep = get(pool, agent_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("reputation row for agent {agent_id}")))?;

    let now = Utc::now();
    let applied_impact = reputation::record_outcome(&mut rep, outcome_type, impact, now);

    let details_json = details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let outcome_id = sqlx::query(
        "INSERT INTO outcomes (agent_id, event_id, outcome_type, reporter, impact_score, details, timestamp)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(agent_id)
    .bind(event_id)
    .bind(outcome_type_str(outcome_type))
    .bind(reporter)
    .bind(applied_impact)
    .bind(&details_json)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    let breakdown_json =
        serde_json::to_string(&rep.breakdown).map_err(|e| StorageError::Serialization(e.to_string()))?;

    sqlx::query(
        "UPDATE reputation SET overall_score = ?, total_actions = ?, success_rate = ?, failure_rate = ?,
                                harmful_actions = ?, user_corrections = ?, breakdown = ?, last_updated = ?
         WHERE agent_id = ?",
    )
    .bind(rep.overall_score)
    .bind(rep.total_actions as i64)
    .bind(rep.success_rate)
    .bind(rep.failure_rate)
    .bind(rep.harmful_actions as i64)
    .bind(rep.user_corrections as i64)
    .bind(&breakdown_json)
    .bind(rep.last_updated)
    .bind(agent_id)
    .execute(pool)
    .await?;

    let outcome = Outcome {
        id: outcome_id,
        agent_id: agent_id.to_string(),
        event_id,
        outcome_type,
        reporter: reporter.to_string(),
        impact_score: applied_impact,
        details,
        timestamp: now,
    };

    Ok((outcome, rep))
}

pub async fn update_domain_score(
    pool: &SqlitePool,
    agent_id: &str,
    domain: &str,
    score: f64,
) -> StorageResult<Reputation> {
    let mut rep = get(pool, agent_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("reputation row for agent {agent_id}")))?;

    let now = Utc::now();
    reputation::update_domain_score(&mut rep, domain, score, now);

    let breakdown_json =
        serde_json::to_string(&rep.breakdown).map_err(|e| StorageError::Serialization(e.to_string()))?;

    sqlx::query("UPDATE reputation SET breakdown = ?, last_updated = ? WHERE agent_id = ?")
        .bind(&breakdown_json)
        .bind(rep.last_updated)
        .bind(agent_id)
        .execute(pool)
        .await?;

    Ok(rep)
}

/// List all reputation rows, most recently updated first.
pub async fn list(pool: &SqlitePool, limit: i64, offset: i64) -> StorageResult<Vec<Reputation>> {
    let rows = sqlx::query("SELECT * FROM reputation ORDER BY last_updated DESC LIMIT ? OFFSET ?")
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_reputation).collect()
}

/// `should_downgrade` is pure and operates on an already-loaded
/// [`Reputation`]; this just fetches it first for callers that only have
/// the agent id.
pub async fn should_downgrade(pool: &SqlitePool, agent_id: &str) -> StorageResult<Option<String>> {
    let rep = get(pool, agent_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("reputation row for agent {agent_id}")))?;
    Ok(rep.should_downgrade())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents;
    use crate::db::{connect, SqliteConfig};
    use serde_json::json;

    async fn memory_pool() -> SqlitePool {
        connect(&SqliteConfig::memory()).await.unwrap()
    }

    /// A fresh agent gets its reputation row via the `agents_insert_reputation`
    /// trigger, starting at the documented defaults.
    #[tokio::test]
    async fn registering_an_agent_seeds_a_default_reputation_row() {
        let pool = memory_pool().await;
        let agent = agents::register(&pool, &"11".repeat(32), Some("a"), None, json!({}))
            .await
            .unwrap();

        let rep = get(&pool, &agent.agent_id).await.unwrap().unwrap();
        assert_eq!(rep.overall_score, 50.0);
        assert_eq!(rep.total_actions, 0);
    }

    /// Scenario: reputation update sequence (spec end-to-end scenario 6).
    #[tokio::test]
    async fn outcome_sequence_matches_literal_scenario() {
        let pool = memory_pool().await;
        let agent = agents::register(&pool, &"22".repeat(32), Some("a"), None, json!({}))
            .await
            .unwrap();

        // no real event row is needed to exercise the reputation math;
        // relax the FK so `outcomes.event_id` can reference a placeholder id
        sqlx::query("PRAGMA foreign_keys = OFF").execute(&pool).await.unwrap();

        let (_, rep) = record_outcome(&pool, &agent.agent_id, 1, OutcomeType::Success, "reporter", None, None)
            .await
            .unwrap();
        assert_eq!(rep.overall_score, 50.5);
        assert_eq!(rep.total_actions, 1);
        assert_eq!(rep.success_rate, 1.0);

        let (_, rep) = record_outcome(&pool, &agent.agent_id, 1, OutcomeType::Harmful, "reporter", None, None)
            .await
            .unwrap();
        assert_eq!(rep.overall_score, 48.5);
        assert_eq!(rep.total_actions, 2);
        assert_eq!(rep.success_rate, 0.5);
        assert_eq!(rep.failure_rate, 0.5);
        assert_eq!(rep.harmful_actions, 1);

        for _ in 0..3 {
            record_outcome(&pool, &agent.agent_id, 1, OutcomeType::Harmful, "reporter", None, None)
                .await
                .unwrap();
        }
        let rep = get(&pool, &agent.agent_id).await.unwrap().unwrap();
        assert_eq!(rep.harmful_actions, 4);
        assert!(rep.should_downgrade().is_none());

        record_outcome(&pool, &agent.agent_id, 1, OutcomeType::Harmful, "reporter", None, None)
            .await
            .unwrap();
        let rep = get(&pool, &agent.agent_id).await.unwrap().unwrap();
        assert_eq!(rep.harmful_actions, 5);
        assert_eq!(
            rep.should_downgrade().as_deref(),
            Some("Too many harmful actions: 5")
        );
    }
}

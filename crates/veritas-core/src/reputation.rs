//! Outcome-driven reputation scoring, one row per agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    Success,
    PartialSuccess,
    Failure,
    UserCorrected,
    Harmful,
}

impl OutcomeType {
    /// Default impact on `overall_score`, per the fixed table. Callers may
    /// override with a custom value in `[-1, 1]`.
    pub fn default_impact(self) -> f64 {
        match self {
            OutcomeType::Success => 0.5,
            OutcomeType::PartialSuccess => 0.2,
            OutcomeType::Failure => -0.3,
            OutcomeType::UserCorrected => -0.5,
            OutcomeType::Harmful => -2.0,
        }
    }

    /// Whether this outcome counts toward the success side of the
    /// success/failure rate split.
    fn is_success_side(self) -> bool {
        matches!(self, OutcomeType::Success | OutcomeType::PartialSuccess)
    }
}

/// An append-only outcome record referencing `(agent_id, event_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: i64,
    pub agent_id: String,
    pub event_id: i64,
    pub outcome_type: OutcomeType,
    pub reporter: String,
    pub impact_score: f64,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// One row per agent, created automatically on agent insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    pub agent_id: String,
    pub overall_score: f64,
    pub total_actions: u64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub harmful_actions: u64,
    pub user_corrections: u64,
    pub breakdown: HashMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

impl Reputation {
    pub fn new(agent_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            overall_score: 50.0,
            total_actions: 0,
            success_rate: 0.0,
            failure_rate: 0.0,
            harmful_actions: 0,
            user_corrections: 0,
            breakdown: HashMap::new(),
            last_updated: now,
        }
    }

    pub fn should_downgrade(&self) -> Option<String> {
        if self.overall_score < 20.0 {
            return Some(format!("overall_score {} is below 20", self.overall_score));
        }
        if self.failure_rate > 0.5 {
            return Some(format!("failure_rate {} exceeds 0.5", self.failure_rate));
        }
        if self.harmful_actions >= 5 {
            return Some(format!("Too many harmful actions: {}", self.harmful_actions));
        }
        None
    }
}

/// Apply one outcome to `reputation` in place, mirroring the five-step
/// `record_outcome` update exactly: clamp the score delta, recompute the
/// running success/failure rates from rounded counts, bump the
/// harmful/user_corrected counters, and stamp `last_updated`.
pub fn record_outcome(
    reputation: &mut Reputation,
    outcome_type: OutcomeType,
    impact: Option<f64>,
    now: DateTime<Utc>,
) -> f64 {
    let delta = impact.unwrap_or_else(|| outcome_type.default_impact()).clamp(-1.0, 1.0);

    reputation.overall_score = (reputation.overall_score + delta).clamp(0.0, 100.0);

    let n = reputation.total_actions as f64;
    let mut success_count = (reputation.success_rate * n).round();
    let mut failure_count = (reputation.failure_rate * n).round();

    if outcome_type.is_success_side() {
        success_count += 1.0;
    } else {
        failure_count += 1.0;
    }

    let new_total = reputation.total_actions + 1;
    reputation.total_actions = new_total;
    reputation.success_rate = success_count / new_total as f64;
    reputation.failure_rate = failure_count / new_total as f64;

    if outcome_type == OutcomeType::Harmful {
        reputation.harmful_actions += 1;
    }
    if outcome_type == OutcomeType::UserCorrected {
        reputation.user_corrections += 1;
    }

    reputation.last_updated = now;
    delta
}

pub fn update_domain_score(reputation: &mut Reputation, domain: &str, score: f64, now: DateTime<Utc>) {
    reputation.breakdown.insert(domain.to_string(), score.clamp(0.0, 1.0));
    reputation.last_updated = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_increases_score_and_rate() {
        let now = Utc::now();
        let mut rep = Reputation::new("agent-1", now);
        record_outcome(&mut rep, OutcomeType::Success, None, now);
        assert_eq!(rep.overall_score, 50.5);
        assert_eq!(rep.total_actions, 1);
        assert_eq!(rep.success_rate, 1.0);
        assert_eq!(rep.failure_rate, 0.0);
    }

    #[test]
    fn harmful_outcome_bumps_counter_and_can_trigger_downgrade() {
        let now = Utc::now();
        let mut rep = Reputation::new("agent-1", now);
        for _ in 0..5 {
            record_outcome(&mut rep, OutcomeType::Harmful, None, now);
        }
        assert_eq!(rep.harmful_actions, 5);
        assert!(rep.should_downgrade().is_some());
    }

    #[test]
    fn score_clamps_at_zero() {
        let now = Utc::now();
        let mut rep = Reputation::new("agent-1", now);
        for _ in 0..40 {
            record_outcome(&mut rep, OutcomeType::Harmful, None, now);
        }
        assert_eq!(rep.overall_score, 0.0);
    }

    #[test]
    fn score_clamps_at_hundred() {
        let now = Utc::now();
        let mut rep = Reputation::new("agent-1", now);
        for _ in 0..200 {
            record_outcome(&mut rep, OutcomeType::Success, None, now);
        }
        assert_eq!(rep.overall_score, 100.0);
    }

    #[test]
    fn custom_impact_is_clamped_to_unit_interval() {
        let now = Utc::now();
        let mut rep = Reputation::new("agent-1", now);
        let applied = record_outcome(&mut rep, OutcomeType::Success, Some(5.0), now);
        assert_eq!(applied, 1.0);
    }

    #[test]
    fn failure_rate_triggers_downgrade() {
        let now = Utc::now();
        let mut rep = Reputation::new("agent-1", now);
        record_outcome(&mut rep, OutcomeType::Failure, None, now);
        record_outcome(&mut rep, OutcomeType::Failure, None, now);
        assert!(rep.failure_rate > 0.5);
        assert!(rep.should_downgrade().is_some());
    }
}

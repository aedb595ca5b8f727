//! The per-agent append-only, hash-linked, signed event log.

use crate::canonical::canonicalize;
use crate::crypto::{sha256_hex, verify_hex};
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of event tags a client may append.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InputReceived,
    DecisionMade,
    ToolCallRequested,
    ToolCallResult,
    ResponseEmitted,
    MemoryCreated,
    MemoryUpdated,
    CapabilityGranted,
    CapabilityRevoked,
    PolicyViolation,
    ErrorOccurred,
    SystemEvent,
}

/// The unsigned event shape: exactly what the canonicalizer hashes and what
/// the signature covers. Field order here is irrelevant — JCS sorts keys —
/// but *presence* is not: `correlation_id` is omitted entirely when absent,
/// while `prev_hash` is always present, `null` for the first event in a chain.
#[derive(Debug, Clone, Serialize)]
pub struct UnsignedEvent {
    pub agent_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl UnsignedEvent {
    pub fn canonical_bytes(&self) -> CoreResult<Vec<u8>> {
        canonicalize(self)
    }

    pub fn hash(&self) -> CoreResult<String> {
        Ok(sha256_hex(&self.canonical_bytes()?))
    }
}

/// A submitted event as it arrives over the wire: the client's claims about
/// hash, signature and (optionally) timestamp/prev_hash, not yet admitted.
#[derive(Debug, Clone, Deserialize)]
pub struct EventSubmission {
    pub agent_id: String,
    pub event_type: EventType,
    pub timestamp: Option<DateTime<Utc>>,
    pub prev_hash: Option<String>,
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub hash: String,
    pub signature: String,
}

/// A persisted, admitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub agent_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub hash: String,
    pub signature: String,
}

impl Event {
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            agent_id: self.agent_id.clone(),
            event_type: self.event_type,
            timestamp: self.timestamp,
            prev_hash: self.prev_hash.clone(),
            payload: self.payload.clone(),
            correlation_id: self.correlation_id,
        }
    }

    /// Recompute the hash from the stored fields; used by chain verification
    /// to detect tampering with any field other than `hash`/`signature` themselves.
    pub fn recompute_hash(&self) -> CoreResult<String> {
        self.unsigned().hash()
    }

    pub fn verify_signature_with_public_key(&self, public_key_hex: &str) -> CoreResult<bool> {
        let bytes = self.unsigned().canonical_bytes()?;
        verify_hex(&self.signature, &bytes, public_key_hex)
    }
}

/// One accumulated violation from [`verify_chain`], indexed against the
/// chronological position of the offending event.
#[derive(Debug, Clone, Serialize)]
pub struct ChainViolation {
    pub index: usize,
    pub event_id: i64,
    pub reason: String,
}

/// Result of a full chain re-verification (recomputes hashes and signatures).
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_events: usize,
    pub errors: Vec<ChainViolation>,
    pub first_invalid_event: Option<usize>,
}

/// Recompute hashes, verify signatures, and check `prev_hash` linkage for a
/// full, chronologically ordered event list belonging to one agent.
///
/// Pure function: the caller is responsible for loading `events` in
/// ascending `(timestamp, id)` order and for supplying the agent's current
/// public key (signature verification uses a single, fixed key — key
/// rotation is out of scope).
pub fn verify_chain(events: &[Event], public_key_hex: &str) -> ChainVerification {
    let mut errors = Vec::new();
    let mut first_invalid = None;

    for (index, event) in events.iter().enumerate() {
        let mut event_ok = true;

        match event.recompute_hash() {
            Ok(recomputed) if recomputed == event.hash => {}
            Ok(_) => {
                errors.push(ChainViolation {
                    index,
                    event_id: event.id,
                    reason: "hash mismatch".to_string(),
                });
                event_ok = false;
            }
            Err(e) => {
                errors.push(ChainViolation {
                    index,
                    event_id: event.id,
                    reason: format!("canonicalization error: {e}"),
                });
                event_ok = false;
            }
        }

        match event.verify_signature_with_public_key(public_key_hex) {
            Ok(true) => {}
            Ok(false) => {
                errors.push(ChainViolation {
                    index,
                    event_id: event.id,
                    reason: "signature invalid".to_string(),
                });
                event_ok = false;
            }
            Err(e) => {
                errors.push(ChainViolation {
                    index,
                    event_id: event.id,
                    reason: format!("signature error: {e}"),
                });
                event_ok = false;
            }
        }

        if index == 0 {
            if event.prev_hash.is_some() {
                errors.push(ChainViolation {
                    index,
                    event_id: event.id,
                    reason: "first event must have prev_hash = null".to_string(),
                });
                event_ok = false;
            }
        } else {
            let prior_hash = &events[index - 1].hash;
            if event.prev_hash.as_deref() != Some(prior_hash.as_str()) {
                errors.push(ChainViolation {
                    index,
                    event_id: event.id,
                    reason: "chain broken: prev_hash does not match prior event's hash".to_string(),
                });
                event_ok = false;
            }
        }

        if !event_ok && first_invalid.is_none() {
            first_invalid = Some(index);
        }
    }

    ChainVerification {
        valid: errors.is_empty(),
        total_events: events.len(),
        errors,
        first_invalid_event: first_invalid,
    }
}

/// Cheap linkage-only check: walks `prev_hash` pointers without touching
/// signatures. Intended for fast integrity audits where CPU cost matters
/// more than catching a forged-but-well-linked chain.
pub fn verify_linkage_only(events: &[Event]) -> ChainVerification {
    let mut errors = Vec::new();
    let mut first_invalid = None;

    for (index, event) in events.iter().enumerate() {
        let ok = if index == 0 {
            event.prev_hash.is_none()
        } else {
            event.prev_hash.as_deref() == Some(events[index - 1].hash.as_str())
        };
        if !ok {
            errors.push(ChainViolation {
                index,
                event_id: event.id,
                reason: "chain broken: prev_hash does not match prior event's hash".to_string(),
            });
            if first_invalid.is_none() {
                first_invalid = Some(index);
            }
        }
    }

    ChainVerification {
        valid: errors.is_empty(),
        total_events: events.len(),
        errors,
        first_invalid_event: first_invalid,
    }
}

/// Reconstruct the canonical unsigned event a client must have signed,
/// substituting the server-resolved `prev_hash` and (if the client omitted
/// one) the server's admission timestamp. Used by the admission pipeline to
/// recompute the hash and verify the signature against exactly what the
/// client actually built.
pub fn reconstruct_unsigned(
    submission: &EventSubmission,
    resolved_prev_hash: Option<String>,
    server_timestamp: DateTime<Utc>,
) -> UnsignedEvent {
    UnsignedEvent {
        agent_id: submission.agent_id.clone(),
        event_type: submission.event_type,
        timestamp: submission.timestamp.unwrap_or(server_timestamp),
        prev_hash: resolved_prev_hash,
        payload: submission.payload.clone(),
        correlation_id: submission.correlation_id,
    }
}

/// Admission-pipeline error kinds (steps 1, 4, 5, 6 of the pipeline). Step 7
/// (`DUPLICATE_EVENT`) is a storage-layer uniqueness violation and is
/// reported by the persistence crate instead.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
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
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Steps 3–6 of the admission pipeline, minus persistence. The caller (the
/// persistence crate, inside its `BEGIN IMMEDIATE` transaction) supplies the
/// resolved `prev_hash`, the agent's public key, and the server clock
/// reading; this function performs canonical reconstruction, the hash
/// check, the signature check, and the chain check, returning the
/// now-validated [`Event`] ready for insertion (still missing its row id).
pub fn admit(
    submission: &EventSubmission,
    resolved_prev_hash: Option<String>,
    public_key_hex: &str,
    server_timestamp: DateTime<Utc>,
) -> Result<Event, AdmissionError> {
    let unsigned = reconstruct_unsigned(submission, resolved_prev_hash.clone(), server_timestamp);
    let recomputed = unsigned.hash()?;

    if recomputed != submission.hash {
        return Err(AdmissionError::HashMismatch {
            submitted: submission.hash.clone(),
            recomputed,
        });
    }

    let bytes = unsigned.canonical_bytes()?;
    if !verify_hex(&submission.signature, &bytes, public_key_hex)? {
        return Err(AdmissionError::SignatureInvalid);
    }

    if submission.prev_hash != resolved_prev_hash {
        return Err(AdmissionError::ChainBroken {
            client: submission.prev_hash.clone(),
            server: resolved_prev_hash,
        });
    }

    Ok(Event {
        id: 0,
        agent_id: unsigned.agent_id,
        event_type: unsigned.event_type,
        timestamp: unsigned.timestamp,
        prev_hash: unsigned.prev_hash,
        payload: unsigned.payload,
        correlation_id: unsigned.correlation_id,
        hash: submission.hash.clone(),
        signature: submission.signature.clone(),
    })
}

//! Core types for Veritas: a cryptographic audit trail for autonomous agents.
//!
//! - [`canonical`] — RFC 8785 JSON canonicalization, the sole source of
//!   truth for both hashing and signing.
//! - [`crypto`] — Ed25519 sign/verify and SHA-256 hashing over canonical bytes.
//! - [`keystore`] — at-rest encryption of an agent's private key.
//! - [`agent`] — agent identity, derived from a public key.
//! - [`event`] — the hash-linked, signed event ledger and its admission pipeline.
//! - [`capability`] — scoped, expiring bearer-token capabilities.
//! - [`reputation`] — outcome-driven reputation scoring.
//!
//! ```
//! use veritas_core::canonical::canonicalize;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Example { b: i32, a: i32 }
//!
//! let bytes = canonicalize(&Example { b: 2, a: 1 }).unwrap();
//! assert_eq!(bytes, br#"{"a":1,"b":2}"#);
//! ```

pub mod agent;
pub mod canonical;
pub mod capability;
pub mod crypto;
pub mod error;
pub mod event;
pub mod keystore;
pub mod reputation;

pub use agent::{Agent, AgentId, AgentStatus};
pub use capability::{Capability, CapabilityStatus};
pub use error::{CoreError, CoreResult};
pub use event::{AdmissionError, ChainVerification, Event, EventSubmission, EventType, UnsignedEvent};
pub use reputation::{Outcome, OutcomeType, Reputation};

//! HTTP API for Veritas: agent registry, event ledger, capability engine,
//! and reputation engine, exposed over axum.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod rate_limiter;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use server::{init_tracing, ServerConfig, VeritasServer};
pub use state::AppState;

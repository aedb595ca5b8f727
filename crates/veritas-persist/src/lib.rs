//! SQLite-backed persistence for the Veritas audit trail.
//!
//! One module per aggregate: [`agents`], [`events`] (the admission
//! pipeline), [`capabilities`], and [`reputation`]. [`db`] owns the
//! connection pool and migrations.

pub mod agents;
pub mod capabilities;
pub mod db;
pub mod error;
pub mod events;
pub mod reputation;

pub use db::{connect, SqliteConfig};
pub use error::{StorageError, StorageResult};

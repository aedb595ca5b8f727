//! Application state: the connection pool and the runtime configuration
//! shared across handlers and middleware.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::rate_limiter::{RateLimitConfig, RateLimiter};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub service_key: String,
    pub signature_timestamp_window_secs: i64,
}

impl ApiConfig {
    /// `SERVICE_API_KEY` is required: there is no safe default for the
    /// credential that gates every administrative mutation, so a missing or
    /// empty value aborts startup before the listener binds rather than
    /// silently running with a guessable key.
    pub fn from_env() -> Self {
        let service_key = std::env::var("SERVICE_API_KEY")
            .expect("SERVICE_API_KEY must be set (no default is provided for this credential)");
        if service_key.is_empty() {
            panic!("SERVICE_API_KEY must not be empty");
        }

        let signature_timestamp_window_secs = match std::env::var("SIGNATURE_TIMESTAMP_WINDOW") {
            Ok(v) => v
                .parse()
                .unwrap_or_else(|_| panic!("SIGNATURE_TIMESTAMP_WINDOW must be an integer number of seconds, got {v:?}")),
            Err(_) => 300,
        };

        Self {
            service_key,
            signature_timestamp_window_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_picks_up_the_configured_service_key() {
        std::env::set_var("SERVICE_API_KEY", "a-configured-key");
        std::env::set_var("SIGNATURE_TIMESTAMP_WINDOW", "120");
        let config = ApiConfig::from_env();
        assert_eq!(config.service_key, "a-configured-key");
        assert_eq!(config.signature_timestamp_window_secs, 120);
        std::env::remove_var("SIGNATURE_TIMESTAMP_WINDOW");
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<ApiConfig>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: ApiConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::from_env())),
        }
    }
}

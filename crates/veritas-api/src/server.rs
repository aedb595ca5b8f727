//! Server assembly: router composition, middleware layering, and graceful
//! shutdown.

use axum::{middleware, Router};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tower_http::compression::CompressionLayer;

use crate::error::ApiError;
use crate::middleware::{
    body_limit_layer, cors_layer, rate_limit_middleware, request_id_middleware,
    security_headers_middleware, timeout_layer, tracing_middleware,
};
use crate::routes::api_router;
use crate::state::{ApiConfig, AppState};
use veritas_persist::SqliteConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub timeout: Duration,
    pub max_body_size: usize,
    pub db: SqliteConfig,
    pub api: ApiConfig,
}

impl ServerConfig {
    /// Build configuration entirely from the environment, per the
    /// ambient-stack design: `PORT`, `HOST`, `DATABASE_URL`, connection pool
    /// tunables, `SERVICE_API_KEY`, `SIGNATURE_TIMESTAMP_WINDOW`, rate-limit
    /// `max`/`window`, `LOG_LEVEL`.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let timeout_secs: u64 = std::env::var("VERITAS_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(30);

        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
        let max_connections: u32 = std::env::var("VERITAS_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Self {
            addr,
            timeout: Duration::from_secs(timeout_secs),
            max_body_size: 1024 * 1024,
            db: SqliteConfig {
                url: database_url,
                max_connections,
                ..SqliteConfig::default()
            },
            api: ApiConfig::from_env(),
        }
    }
}

pub struct VeritasServer {
    config: ServerConfig,
    app_state: AppState,
}

impl VeritasServer {
    pub async fn new(config: ServerConfig) -> Result<Self, ApiError> {
        let pool = veritas_persist::connect(&config.db)
            .await
            .map_err(|e| ApiError::Internal(format!("database init failed: {e}")))?;
        let app_state = AppState::new(pool, config.api.clone());
        Ok(Self { config, app_state })
    }

    pub fn router(&self) -> Router {
        api_router(self.app_state.clone())
            .layer(CompressionLayer::new())
            .layer(body_limit_layer(self.config.max_body_size))
            .layer(timeout_layer(self.config.timeout))
            .layer(cors_layer())
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(middleware::from_fn(tracing_middleware))
            .layer(middleware::from_fn_with_state(
                self.app_state.clone(),
                rate_limit_middleware,
            ))
    }

    pub async fn run(self) -> Result<(), ApiError> {
        spawn_capability_sweep(self.app_state.pool.clone());

        let app = self.router();
        let addr = self.config.addr;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to bind {addr}: {e}")))?;

        tracing::info!(%addr, "veritas-api listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApiError::Internal(format!("server error: {e}")))?;

        tracing::info!("server shutdown complete");
        Ok(())
    }
}

const CAPABILITY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically transition elapsed capabilities to `expired`, mirroring the
/// rate limiter's own background eviction. Purely a housekeeping convenience
/// for listings/audits — `check_permission`/`validate` already treat an
/// elapsed `expires_at` as invalid without waiting for this to run.
fn spawn_capability_sweep(pool: SqlitePool) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CAPABILITY_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match veritas_persist::capabilities::sweep(&pool).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "swept expired capabilities"),
                Err(e) => tracing::error!(error = %e, "capability sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, starting graceful shutdown"),
        _ = terminate => tracing::info!("received sigterm, starting graceful shutdown"),
    }
}

pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,veritas_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_from_env_has_sane_defaults() {
        std::env::set_var("SERVICE_API_KEY", "test-only-service-key");
        let config = ServerConfig::from_env();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, 1024 * 1024);
    }
}

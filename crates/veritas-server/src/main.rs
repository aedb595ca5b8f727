//! Standalone entry point for the Veritas audit-trail service: a thin
//! wrapper around `veritas-api` to provide a runnable binary.

use anyhow::Result;
use veritas_api::{ServerConfig, VeritasServer};

#[tokio::main]
async fn main() -> Result<()> {
    veritas_api::init_tracing();

    tracing::info!("starting veritas audit-trail service");

    let config = ServerConfig::from_env();
    let server = VeritasServer::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("server init failed: {e}"))?;

    server.run().await.map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}

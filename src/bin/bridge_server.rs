//! bridge_server — REST front end for a ComfyUI engine.
//!
//! Every setting is a flag with an environment fallback (see `BridgeConfig`);
//! a `.env` file in the working directory is loaded first.
//!
//! Usage:
//!   cargo run --features server --bin bridge_server -- \
//!     --engine-host 127.0.0.1 --engine-port 8188 --server-port 18188

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use comfy_bridge::api::build_router;
use comfy_bridge::{BridgeConfig, HttpEngineClient, SyncBridge};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = BridgeConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;

    let client = HttpEngineClient::new(&config).context("failed to build engine client")?;
    tracing::info!(
        engine = %config.engine_address(),
        client_id = client.client_id(),
        default_timeout_secs = config.default_timeout_secs,
        poll_interval_ms = config.poll_interval_ms,
        "Engine client ready"
    );

    let bind_addr = config.server_address();
    let app = build_router(Arc::new(SyncBridge::new(client, config)));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    tracing::info!("bridge_server listening on {bind_addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

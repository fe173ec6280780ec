//! # cloak-server
//!
//! HTTP adapter for the Cloak identity core.
//!
//! This binary provides:
//! - **Configuration loading** with fatal errors for missing or malformed keys
//! - **REST API** (axum) over every exposed identity operation
//! - **Caller context** taken from headers set by the authenticating gateway
//!
//! Authentication itself happens upstream; this process only maps the core's
//! typed errors to HTTP status codes.

mod api;
mod config;
mod error;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cloak_core::IdentityCore;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cloak_core=debug,cloak_server=debug")),
        )
        .init();

    info!("Starting Cloak identity server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration. Key problems stop the process here.
    // -----------------------------------------------------------------------
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(?config, "Loaded configuration");
    if config.gateway_token.is_none() {
        tracing::warn!("CLOAK_GATEWAY_TOKEN is not set; caller API is disabled");
    }

    // -----------------------------------------------------------------------
    // 3. Open the primary store and the vault
    // -----------------------------------------------------------------------
    let core = IdentityCore::open(&config.core).await?;

    let http_addr = config.http_addr;
    let app_state = AppState {
        core,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vinhubd: HTTP adapter for the vinhub report-dispatch engine.

pub mod api;
pub mod auth;
pub mod error;
pub mod port;

use std::sync::Arc;

use tokio::net::TcpListener;

use vinhub::dispatcher::Engine;
use vinhub::EngineConfig;

/// Configuration for the hubd server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "vinhubd", about = "HTTP adapter for the vinhub report engine")]
pub struct HubdConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "VINHUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9310, env = "VINHUB_PORT")]
    pub port: u16,

    /// Bearer token for API auth. If unset, auth is disabled.
    #[arg(long, env = "VINHUB_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    #[command(flatten)]
    pub engine: EngineConfig,
}

/// Shared hubd state.
pub struct HubState {
    pub engine: Arc<Engine>,
    pub auth_token: Option<String>,
}

/// Run the hubd server until shutdown.
pub async fn run(config: HubdConfig) -> anyhow::Result<()> {
    let engine = Engine::open(config.engine.clone(), Arc::new(port::LoggingPort))?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(HubState { engine: Arc::clone(&engine), auth_token: config.auth_token });
    let router = api::build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("vinhubd listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            engine.shutdown();
        })
        .await?;

    Ok(())
}

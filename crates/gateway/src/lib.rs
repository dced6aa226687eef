// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PinkSync gateway: authenticated WebSocket rooms, broadcast and direct
//! delivery for real-time collaboration.

pub mod config;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;
pub mod test_support;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GatewayConfig;
use crate::state::GatewayState;
use crate::transport::build_router;

/// Run the gateway until ctrl-c.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let state = Arc::new(GatewayState::new(config, shutdown.clone())?);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        signal.cancel();
    });

    serve(listener, state).await
}

/// Serve on an already-bound listener until `state.shutdown` fires.
pub async fn serve(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("pinksync gateway listening on {addr}");

    let shutdown = state.shutdown.clone();
    let router = build_router(state);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    Ok(())
}

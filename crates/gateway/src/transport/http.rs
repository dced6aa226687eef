// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the gateway.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use pinksync_protocol::iso8601_now;
use serde::Serialize;

use crate::registry::RegistryStats;
use crate::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pinksync",
        timestamp: iso8601_now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// `GET /stats`
pub async fn stats(State(state): State<Arc<GatewayState>>) -> Json<RegistryStats> {
    Json(state.registry().stats())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client connection manager for a PinkSync gateway.
//!
//! [`SyncClient`] owns one WebSocket connection, performs the token
//! handshake, reconnects after unexpected closes, and fans inbound frames out
//! to callbacks registered with [`SyncClient::on`].

mod client;
mod config;
mod error;
mod events;
mod reconnect;

pub use client::{ConnectionState, SyncClient};
pub use config::{ClientConfig, MIN_RECONNECT_DELAY};
pub use error::ClientError;
pub use events::{
    Callback, EventBus, Subscription, EVENT_CONNECTED, EVENT_DISCONNECTED, EVENT_ERROR,
    EVENT_MESSAGE,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};

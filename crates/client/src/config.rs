// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::error::ClientError;

/// Reconnect delays below this are raised to it.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Connection settings for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway WebSocket endpoint, e.g. `ws://127.0.0.1:8004/ws`.
    pub url: String,
    /// Credential sent in the `authenticate` frame.
    pub token: String,
    pub auto_reconnect: bool,
    /// Wait before each reconnect attempt. Clamped to [`MIN_RECONNECT_DELAY`].
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// How long an intentional disconnect suppresses reconnect decisions.
    pub disconnect_guard: Duration,
    /// Upper bound on opening the transport plus the handshake.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            auto_reconnect: true,
            reconnect_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            disconnect_guard: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn effective_reconnect_delay(&self) -> Duration {
        self.reconnect_delay.max(MIN_RECONNECT_DELAY)
    }

    /// HTTP stats endpoint derived from the WebSocket URL.
    ///
    /// `ws` becomes `http`, `wss` becomes `https`, and a trailing `/ws` path
    /// segment becomes `/stats`.
    pub fn stats_url(&self) -> Result<String, ClientError> {
        let (scheme, rest) = self
            .url
            .split_once("://")
            .ok_or_else(|| ClientError::InvalidUrl(self.url.clone()))?;
        let scheme = match scheme {
            "ws" => "http",
            "wss" => "https",
            _ => return Err(ClientError::InvalidUrl(self.url.clone())),
        };

        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(ClientError::InvalidUrl(self.url.clone()));
        }

        let base = path.trim_end_matches('/');
        let base = base.strip_suffix("/ws").unwrap_or(base);
        Ok(format!("{scheme}://{authority}{base}/stats"))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

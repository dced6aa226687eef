// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External collaborators: preference storage and the trust-score event log.
//!
//! Calls are spawned onto the runtime and never awaited by the frame that
//! triggered them. Failures end up in the log, not on the wire.

use std::time::Duration;

use futures_util::future::BoxFuture;
use pinksync_protocol::iso8601_now;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// Persists accessibility preferences for an identity.
///
/// `save` is called on the triggering frame's task; only the returned future
/// runs in the background.
pub trait PreferenceStore: Send + Sync + 'static {
    fn save(&self, identity: String, preferences: Value) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Records lifecycle events against an identity.
pub trait EventLog: Send + Sync + 'static {
    fn record(
        &self,
        event: &'static str,
        identity: String,
        metadata: Map<String, Value>,
    ) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Lifecycle events sent to the [`EventLog`].
pub const EVENT_CONNECTED: &str = "realtime_connected";
pub const EVENT_DISCONNECTED: &str = "realtime_disconnected";

// ---------------------------------------------------------------------------
// Fire-and-forget dispatch
// ---------------------------------------------------------------------------

/// Save preferences in the background.
pub fn spawn_save(store: &dyn PreferenceStore, identity: String, preferences: Value) {
    let pending = store.save(identity.clone(), preferences);
    tokio::spawn(async move {
        if let Err(e) = pending.await {
            warn!(user = %identity, err = %e, "preference save failed");
        }
    });
}

/// Record an event in the background.
pub fn spawn_record(
    log: &dyn EventLog,
    event: &'static str,
    identity: String,
    metadata: Map<String, Value>,
) {
    let pending = log.record(event, identity.clone(), metadata);
    tokio::spawn(async move {
        if let Err(e) = pending.await {
            debug!(user = %identity, event, err = %e, "event log write failed");
        }
    });
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Writes preference updates to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPreferenceStore;

impl PreferenceStore for LoggingPreferenceStore {
    fn save(&self, identity: String, preferences: Value) -> BoxFuture<'static, anyhow::Result<()>> {
        info!(user = %identity, %preferences, "accessibility preferences updated");
        Box::pin(async { Ok(()) })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventLog;

impl EventLog for NoopEventLog {
    fn record(
        &self,
        _event: &'static str,
        _identity: String,
        _metadata: Map<String, Value>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Client for collaborator calls.
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<Client> {
    // reqwest is built without a default crypto provider; a second install
    // is a harmless no-op.
    let _ = rustls::crypto::ring::default_provider().install_default();
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("building collaborator http client: {e}"))
}

fn post_json(client: &Client, url: &str, body: Value) -> BoxFuture<'static, anyhow::Result<()>> {
    let request = client.post(url).json(&body);
    Box::pin(async move {
        request.send().await?.error_for_status()?;
        Ok(())
    })
}

/// POSTs `{user_id, preferences, timestamp}` to the preferences endpoint.
pub struct HttpPreferenceStore {
    url: String,
    client: Client,
}

impl HttpPreferenceStore {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { url, client: http_client(timeout)? })
    }
}

impl PreferenceStore for HttpPreferenceStore {
    fn save(&self, identity: String, preferences: Value) -> BoxFuture<'static, anyhow::Result<()>> {
        let body = json!({
            "user_id": identity,
            "preferences": preferences,
            "timestamp": iso8601_now(),
        });
        post_json(&self.client, &self.url, body)
    }
}

/// POSTs `{event, user_id, ...metadata, timestamp}` to the event log.
pub struct HttpEventLog {
    url: String,
    client: Client,
}

impl HttpEventLog {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { url, client: http_client(timeout)? })
    }
}

impl EventLog for HttpEventLog {
    fn record(
        &self,
        event: &'static str,
        identity: String,
        metadata: Map<String, Value>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        let mut body = metadata;
        body.insert("event".to_owned(), Value::from(event));
        body.insert("user_id".to_owned(), Value::from(identity));
        body.insert("timestamp".to_owned(), Value::from(iso8601_now()));
        post_json(&self.client, &self.url, Value::Object(body))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

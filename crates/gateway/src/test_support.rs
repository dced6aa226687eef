// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders, recording collaborators and an
//! in-process gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::identity::{TokenVerifier, UnverifiedDecoder};
use crate::state::GatewayState;
use crate::store::{EventLog, PreferenceStore};

/// An unsigned JWT-shaped token whose payload carries `sub`.
pub fn unsigned_token(sub: &str) -> String {
    token_with_claims(&json!({ "sub": sub }))
}

/// An unsigned JWT-shaped token with arbitrary claims.
pub fn token_with_claims(claims: &Value) -> String {
    format!("eyJhbGciOiJub25lIn0.{}.sig", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

/// One call seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Preferences { identity: String, preferences: Value },
    Event { event: String, identity: String, metadata: Map<String, Value> },
}

/// Collaborator double that remembers every call.
#[derive(Debug, Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().clone()
    }

    /// Names of recorded events for `identity`, in order.
    pub fn events_for(&self, identity: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Recorded::Event { event, identity: who, .. } if who == identity => {
                    Some(event.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl PreferenceStore for RecordingStore {
    fn save(&self, identity: String, preferences: Value) -> BoxFuture<'static, anyhow::Result<()>> {
        self.calls.lock().push(Recorded::Preferences { identity, preferences });
        Box::pin(async { Ok(()) })
    }
}

impl EventLog for RecordingStore {
    fn record(
        &self,
        event: &'static str,
        identity: String,
        metadata: Map<String, Value>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        self.calls.lock().push(Recorded::Event { event: event.to_owned(), identity, metadata });
        Box::pin(async { Ok(()) })
    }
}

/// A gateway served on an ephemeral port. Shuts down on drop.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: Arc<GatewayState>,
    pub store: Arc<RecordingStore>,
}

impl TestGateway {
    /// Unverified tokens, recording collaborators.
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with_verifier(Arc::new(UnverifiedDecoder)).await
    }

    pub async fn start_with_verifier(verifier: Arc<dyn TokenVerifier>) -> anyhow::Result<Self> {
        let store = RecordingStore::new();
        let state = Arc::new(GatewayState::with_collaborators(
            GatewayConfig::for_tests(),
            CancellationToken::new(),
            verifier,
            Arc::clone(&store) as Arc<dyn PreferenceStore>,
            Arc::clone(&store) as Arc<dyn EventLog>,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let serving = Arc::clone(&state);
        tokio::spawn(async move {
            let _ = crate::serve(listener, serving).await;
        });

        Ok(Self { addr, state, store })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

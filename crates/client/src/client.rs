// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side connection manager.
//!
//! ```text
//! disconnected -> connecting -> authenticating -> connected
//!       ^                                            |
//!       +--------------- reconnecting <--------------+
//! ```
//!
//! Every connection attempt gets a new generation number. Background tasks
//! carry the generation they were started for and become no-ops once it is
//! stale, so a late close or a late handshake reply can never clobber newer
//! state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pinksync_protocol::{ClientFrame, ErrorReason};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{
    EventBus, Subscription, EVENT_CONNECTED, EVENT_DISCONNECTED, EVENT_ERROR, EVENT_MESSAGE,
};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Vec<(&'static str, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

struct Shared {
    state: ConnectionState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    session_cancel: Option<CancellationToken>,
    reconnect_timer: Option<CancellationToken>,
    intentional: bool,
    policy: ReconnectPolicy,
    user_id: Option<String>,
    rooms: Vec<String>,
    /// Set when the gateway replaced this session with a newer login.
    replaced: Option<String>,
}

impl Shared {
    fn begin_attempt(&mut self) -> u64 {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.replaced = None;
        self.generation
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }
}

struct Inner {
    config: ClientConfig,
    bus: EventBus,
    shared: Mutex<Shared>,
}

/// Connection manager for one identity against one gateway.
///
/// Cheap to clone; clones share the connection. Call
/// [`disconnect`](Self::disconnect) to stop background work.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let policy = ReconnectPolicy::new(
            config.auto_reconnect,
            config.effective_reconnect_delay(),
            config.max_reconnect_attempts,
        );
        let shared = Shared {
            state: ConnectionState::Disconnected,
            generation: 0,
            outbound: None,
            session_cancel: None,
            reconnect_timer: None,
            intentional: false,
            policy,
            user_id: None,
            rooms: Vec::new(),
            replaced: None,
        };
        Self {
            inner: Arc::new(Inner { config, bus: EventBus::new(), shared: Mutex::new(shared) }),
        }
    }

    /// Open the transport and authenticate. Resolves with the identity the
    /// gateway bound.
    ///
    /// Fails immediately with [`ClientError::ConnectInProgress`] while
    /// another attempt is running. A transport failure is still returned to
    /// the caller, and also hands the client to the reconnect policy.
    pub async fn connect(&self) -> Result<String, ClientError> {
        let generation = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Connecting | ConnectionState::Authenticating => {
                    return Err(ClientError::ConnectInProgress)
                }
                ConnectionState::Connected => {
                    return shared.user_id.clone().ok_or(ClientError::NotConnected)
                }
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            }
            shared.cancel_timer();
            shared.intentional = false;
            shared.begin_attempt()
        };

        match establish(&self.inner, generation).await {
            Ok(user_id) => Ok(user_id),
            Err(err) => {
                self.inner.attempt_failed(generation, &err);
                Err(err)
            }
        }
    }

    /// Close the connection and stop any pending reconnect.
    pub fn disconnect(&self) {
        let previous = {
            let mut shared = self.inner.shared.lock();
            shared.intentional = true;
            shared.cancel_timer();
            if let Some(session) = shared.session_cancel.take() {
                session.cancel();
            }
            shared.outbound = None;
            shared.user_id = None;
            shared.rooms.clear();
            shared.generation += 1;
            std::mem::replace(&mut shared.state, ConnectionState::Disconnected)
        };

        if previous != ConnectionState::Disconnected {
            info!(from = previous.as_str(), "disconnected by client");
            self.inner.bus.emit(
                EVENT_DISCONNECTED,
                &json!({ "reason": "client disconnect", "intentional": true }),
            );
        }

        let inner = Arc::clone(&self.inner);
        let guard = inner.config.disconnect_guard;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(guard).await;
                    let mut shared = inner.shared.lock();
                    if shared.state == ConnectionState::Disconnected {
                        shared.intentional = false;
                    }
                });
            }
            Err(_) => inner.shared.lock().intentional = false,
        }
    }

    pub fn join_room(&self, room: &str) -> Result<(), ClientError> {
        self.send_then(&ClientFrame::JoinRoom { room: room.to_owned() }, |shared| {
            if !shared.rooms.iter().any(|r| r == room) {
                shared.rooms.push(room.to_owned());
            }
        })
    }

    pub fn leave_room(&self, room: &str) -> Result<(), ClientError> {
        self.send_then(&ClientFrame::LeaveRoom { room: room.to_owned() }, |shared| {
            shared.rooms.retain(|r| r != room);
        })
    }

    pub fn broadcast(&self, room: &str, content: Value) -> Result<(), ClientError> {
        self.send(&ClientFrame::Broadcast { room: room.to_owned(), content })
    }

    pub fn send_direct_message(&self, target_user_id: &str, content: Value) -> Result<(), ClientError> {
        self.send(&ClientFrame::DirectMessage { target_user_id: target_user_id.to_owned(), content })
    }

    pub fn update_accessibility_preferences(&self, preferences: Value) -> Result<(), ClientError> {
        self.send(&ClientFrame::AccessibilityUpdate { preferences })
    }

    pub fn ping(&self) -> Result<(), ClientError> {
        self.send(&ClientFrame::Ping {})
    }

    /// Subscribe to a frame `type` or a lifecycle event.
    pub fn on(&self, event: &str, callback: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.inner.bus.on(event, callback)
    }

    /// Drop every callback registered for `event`.
    pub fn off(&self, event: &str) -> usize {
        self.inner.bus.off(event)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.shared.lock().user_id.clone()
    }

    /// Rooms joined through this client, in join order.
    pub fn rooms(&self) -> Vec<String> {
        self.inner.shared.lock().rooms.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.lock().policy.attempts()
    }

    /// Fetch the gateway's `/stats` document.
    pub async fn get_stats(&self) -> Result<Value, ClientError> {
        let url = self.inner.config.stats_url()?;
        // reqwest is built without a default crypto provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder()
            .timeout(self.inner.config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;
        let resp = http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ClientError::Http(e.to_string()))?;
        resp.json().await.map_err(|e| ClientError::Http(e.to_string()))
    }

    fn send(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        self.send_then(frame, |_| {})
    }

    /// Queue `frame` and, when queued, apply `update` under the same lock.
    fn send_then(&self, frame: &ClientFrame, update: impl FnOnce(&mut Shared)) -> Result<(), ClientError> {
        let text = serde_json::to_string(frame).map_err(|e| ClientError::Transport(e.to_string()))?;
        let mut shared = self.inner.shared.lock();
        if shared.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let tx = shared.outbound.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Message::Text(text.into())).map_err(|_| ClientError::NotConnected)?;
        update(&mut shared);
        Ok(())
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("SyncClient")
            .field("url", &self.inner.config.url)
            .field("state", &shared.state)
            .field("user_id", &shared.user_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Connection attempts
// ---------------------------------------------------------------------------

/// Open the transport, send `authenticate`, and wait for the verdict.
async fn establish(inner: &Arc<Inner>, generation: u64) -> Result<String, ClientError> {
    let config = &inner.config;
    let socket = match tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((socket, _))) => socket,
        Ok(Err(e)) => return Err(ClientError::Transport(e.to_string())),
        Err(_) => return Err(ClientError::Timeout),
    };
    let (mut sink, mut stream) = socket.split();

    if !inner.advance(generation, ConnectionState::Authenticating) {
        let _ = sink.close().await;
        return Err(ClientError::Closed);
    }
    let hello = serde_json::to_string(&ClientFrame::Authenticate { token: Some(config.token.clone()) })
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    sink.send(Message::Text(hello.into())).await.map_err(|e| ClientError::Transport(e.to_string()))?;

    let deadline = tokio::time::sleep(config.connect_timeout);
    tokio::pin!(deadline);
    loop {
        let msg = tokio::select! {
            _ = &mut deadline => return Err(ClientError::Timeout),
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                let Some(value) = parse(text.as_str()) else { continue };
                match frame_type(&value) {
                    Some("authenticated") => {
                        let user_id =
                            value.get("userId").and_then(Value::as_str).unwrap_or_default().to_owned();
                        return inner.activate(generation, user_id, sink, stream, &value);
                    }
                    Some("auth_error") => {
                        inner.publish(&value);
                        let message = value
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("authentication failed")
                            .to_owned();
                        return Err(ClientError::AuthRejected(message));
                    }
                    _ => inner.publish(&value),
                }
            }
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
        }
    }
}

/// Wait out the reconnect delay, then try again.
async fn reconnect_after(inner: Arc<Inner>, timer: CancellationToken, delay: Duration, attempt: u32) {
    tokio::select! {
        _ = timer.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let generation = {
        let mut shared = inner.shared.lock();
        if timer.is_cancelled() || shared.intentional || shared.state != ConnectionState::Reconnecting {
            return;
        }
        shared.reconnect_timer = None;
        shared.begin_attempt()
    };

    info!(attempt, "reconnecting");
    if let Err(err) = establish(&inner, generation).await {
        debug!(attempt, err = %err, "reconnect attempt failed");
        inner.attempt_failed(generation, &err);
    }
}

/// Pump one authenticated connection until it ends.
async fn run_session(
    inner: Arc<Inner>,
    generation: u64,
    mut sink: SplitSink<Socket, Message>,
    mut stream: SplitStream<Socket>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    let lost = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break None;
            }

            out = outbound.recv() => {
                let Some(msg) = out else { break Some("outbound queue closed".to_owned()) };
                if let Err(e) = sink.send(msg).await {
                    break Some(format!("send failed: {e}"));
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => inner.handle_text(generation, text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_owned());
                        break Some(reason);
                    }
                    None => break Some("connection lost".to_owned()),
                    Some(Err(e)) => break Some(e.to_string()),
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    if let Some(reason) = lost {
        inner.session_lost(generation, reason);
    }
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

impl Inner {
    /// Move a still-current attempt to `state`.
    fn advance(&self, generation: u64, state: ConnectionState) -> bool {
        let mut shared = self.shared.lock();
        if shared.generation != generation || shared.intentional {
            return false;
        }
        shared.state = state;
        true
    }

    /// Handshake succeeded: publish the session and start pumping it.
    fn activate(
        self: &Arc<Self>,
        generation: u64,
        user_id: String,
        sink: SplitSink<Socket, Message>,
        stream: SplitStream<Socket>,
        frame: &Value,
    ) -> Result<String, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.intentional {
                // Dropping both halves closes the socket.
                return Err(ClientError::Closed);
            }
            shared.state = ConnectionState::Connected;
            shared.outbound = Some(tx);
            shared.session_cancel = Some(cancel.clone());
            shared.user_id = Some(user_id.clone());
            shared.policy.on_authenticated();
        }

        info!(user = %user_id, "connected");
        self.publish(frame);
        self.bus.emit(EVENT_CONNECTED, &json!({ "userId": user_id }));
        tokio::spawn(run_session(Arc::clone(self), generation, sink, stream, rx, cancel));
        Ok(user_id)
    }

    fn handle_text(&self, generation: u64, text: &str) {
        let Some(value) = parse(text) else {
            warn!("ignoring unparseable frame from gateway");
            return;
        };
        if frame_type(&value) == Some("error")
            && value.get("reason").and_then(Value::as_str) == Some(ErrorReason::SessionReplaced.as_str())
        {
            let mut shared = self.shared.lock();
            if shared.generation == generation {
                let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
                shared.replaced = Some(message.to_owned());
            }
        }
        self.publish(&value);
    }

    /// Deliver an inbound frame under its `type` and under `message`.
    fn publish(&self, value: &Value) {
        if let Some(kind) = frame_type(value) {
            self.bus.emit(kind, value);
        }
        self.bus.emit(EVENT_MESSAGE, value);
    }

    /// An established session ended without the client asking for it.
    fn session_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let mut pending = Pending::new();
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared.outbound = None;
            shared.session_cancel = None;
            shared.user_id = None;
            pending.push((
                EVENT_DISCONNECTED,
                json!({ "reason": reason, "intentional": shared.intentional }),
            ));

            if shared.intentional {
                shared.state = ConnectionState::Disconnected;
            } else if let Some(message) = shared.replaced.take() {
                shared.state = ConnectionState::Disconnected;
                pending.push((
                    EVENT_ERROR,
                    json!({ "reason": ErrorReason::SessionReplaced.as_str(), "message": message }),
                ));
            } else {
                self.decide_reconnect(&mut shared, &mut pending);
            }
        }
        warn!(%reason, "connection lost");
        self.emit_all(pending);
    }

    /// A connection attempt for `generation` failed before authenticating.
    fn attempt_failed(self: &Arc<Self>, generation: u64, err: &ClientError) {
        let mut pending = Pending::new();
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared.state = ConnectionState::Disconnected;
            pending.push((
                EVENT_DISCONNECTED,
                json!({ "reason": err.to_string(), "intentional": shared.intentional }),
            ));
            if let ClientError::AuthRejected(message) = err {
                pending.push((EVENT_ERROR, json!({ "reason": "auth_rejected", "message": message })));
            } else if !shared.intentional && !err.is_definitive() {
                self.decide_reconnect(&mut shared, &mut pending);
            }
        }
        self.emit_all(pending);
    }

    fn decide_reconnect(self: &Arc<Self>, shared: &mut Shared, pending: &mut Pending) {
        match shared.policy.on_unexpected_close() {
            ReconnectDecision::Schedule { attempt, delay } => {
                shared.state = ConnectionState::Reconnecting;
                let timer = CancellationToken::new();
                shared.reconnect_timer = Some(timer.clone());
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                tokio::spawn(reconnect_after(Arc::clone(self), timer, delay, attempt));
            }
            ReconnectDecision::Exhausted => {
                shared.state = ConnectionState::Disconnected;
                let max = self.config.max_reconnect_attempts;
                pending.push((
                    EVENT_ERROR,
                    json!({
                        "reason": "reconnect_exhausted",
                        "message": format!("gave up after {max} reconnect attempts"),
                    }),
                ));
            }
            ReconnectDecision::Disabled => shared.state = ConnectionState::Disconnected,
        }
    }

    fn emit_all(&self, pending: Pending) {
        for (event, payload) in pending {
            self.bus.emit(event, &payload);
        }
    }
}

fn parse(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text).ok().filter(Value::is_object)
}

fn frame_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

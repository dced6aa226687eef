// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound frame dispatch.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use pinksync_protocol::{iso8601_now, ClientFrame, FrameError, ServerFrame};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::GatewayError;
use crate::handshake::Handshake;
use crate::identity::TokenVerifier;
use crate::registry::{Connection, Registry};
use crate::store::{self, EventLog, PreferenceStore, EVENT_CONNECTED, EVENT_DISCONNECTED};

/// Routes validated frames to the registry and collaborators.
pub struct MessageRouter {
    registry: Arc<Registry>,
    verifier: Arc<dyn TokenVerifier>,
    preferences: Arc<dyn PreferenceStore>,
    events: Arc<dyn EventLog>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<Registry>,
        verifier: Arc<dyn TokenVerifier>,
        preferences: Arc<dyn PreferenceStore>,
        events: Arc<dyn EventLog>,
    ) -> Self {
        Self { registry, verifier, preferences, events }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one inbound text frame. Errors are answered on `conn`; nothing
    /// propagates to the caller.
    pub async fn handle_text(&self, conn: &Connection, handshake: &mut Handshake, text: &str) {
        if handshake.is_terminal() || !conn.is_open() {
            return;
        }
        if let Err(err) = self.route(conn, handshake, text).await {
            report(conn, &err);
        }
    }

    /// Release everything a terminated connection held.
    pub fn terminate(&self, conn: &Connection, handshake: &mut Handshake) {
        handshake.close();
        let removal = self.registry.unregister(conn.id());
        if let Some(identity) = removal.identity {
            store::spawn_record(
                self.events.as_ref(),
                EVENT_DISCONNECTED,
                identity,
                conn_metadata(conn),
            );
        }
    }

    async fn route(
        &self,
        conn: &Connection,
        handshake: &mut Handshake,
        text: &str,
    ) -> Result<(), GatewayError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        if !handshake.is_authenticated() {
            return self.route_unauthenticated(conn, handshake, &value).await;
        }

        let frame = match ClientFrame::from_value(value) {
            Ok(frame) => frame,
            Err(FrameError::UnknownType(kind)) => {
                debug!(conn = conn.id(), %kind, "ignoring unrecognized frame");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let identity = handshake.require_authenticated()?.to_owned();

        // A panicking handler must not take the connection task down with it.
        let kind = frame.kind();
        catch_unwind(AssertUnwindSafe(|| self.dispatch(conn, &identity, frame))).unwrap_or_else(
            |panic| Err(GatewayError::Handler(format!("{kind}: {}", panic_message(&*panic)))),
        )
    }

    /// Before the handshake only `authenticate` is read, and only loosely.
    async fn route_unauthenticated(
        &self,
        conn: &Connection,
        handshake: &mut Handshake,
        value: &Value,
    ) -> Result<(), GatewayError> {
        match value.get("type").and_then(Value::as_str) {
            None => Err(FrameError::MissingType.into()),
            Some("authenticate") => {
                let token = value.get("token").and_then(Value::as_str);
                let result = handshake
                    .authenticate(conn, &self.registry, self.verifier.as_ref(), token)
                    .await;
                // The handshake has already replied either way.
                if let Ok(identity) = result {
                    store::spawn_record(
                        self.events.as_ref(),
                        EVENT_CONNECTED,
                        identity,
                        conn_metadata(conn),
                    );
                }
                Ok(())
            }
            Some(_) => Err(GatewayError::NotAuthenticated),
        }
    }

    fn dispatch(
        &self,
        conn: &Connection,
        identity: &str,
        frame: ClientFrame,
    ) -> Result<(), GatewayError> {
        match frame {
            ClientFrame::JoinRoom { room } => {
                require_room("join_room", &room)?;
                self.registry.join_room(conn.id(), &room);
            }
            ClientFrame::LeaveRoom { room } => {
                require_room("leave_room", &room)?;
                self.registry.leave_room(conn.id(), &room);
            }
            ClientFrame::Broadcast { room, content } => {
                require_room("broadcast", &room)?;
                let notice = ServerFrame::Broadcast {
                    user_id: identity.to_owned(),
                    room: room.clone(),
                    content,
                    timestamp: iso8601_now(),
                };
                let delivered = self.registry.broadcast(&room, &notice, Some(conn.id()))?;
                debug!(conn = conn.id(), user = identity, %room, delivered, "broadcast");
            }
            ClientFrame::DirectMessage { target_user_id, content } => {
                self.registry.direct_message(identity, &target_user_id, content)?;
            }
            ClientFrame::AccessibilityUpdate { preferences } => {
                store::spawn_save(self.preferences.as_ref(), identity.to_owned(), preferences);
            }
            ClientFrame::Ping {} => {
                conn.send(&ServerFrame::Pong {});
            }
            ClientFrame::Authenticate { .. } => return Err(GatewayError::AlreadyAuthenticated),
        }
        Ok(())
    }
}

fn require_room(kind: &str, room: &str) -> Result<(), GatewayError> {
    if room.is_empty() {
        return Err(FrameError::Invalid {
            kind: kind.to_owned(),
            detail: "room must not be empty".to_owned(),
        }
        .into());
    }
    Ok(())
}

fn report(conn: &Connection, err: &GatewayError) {
    match err {
        GatewayError::Handler(_) => {
            error!(conn = conn.id(), code = err.as_str(), err = %err, "frame handler failed")
        }
        _ => debug!(conn = conn.id(), code = err.as_str(), err = %err, "frame refused"),
    }
    if let Some(frame) = err.to_frame() {
        conn.send(&frame);
    }
}

fn conn_metadata(conn: &Connection) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("connection_id".to_owned(), Value::from(conn.id()));
    metadata
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;

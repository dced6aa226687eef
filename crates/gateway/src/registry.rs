// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection and room registry.
//!
//! Owns the identity index (identity -> connection) and the room index
//! (room -> members). Every operation takes the registry lock exactly once and
//! never awaits, so no operation can observe another half-applied. Sends are
//! pushes onto unbounded per-connection queues and therefore never block while
//! the lock is held.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use pinksync_protocol::{iso8601_now, ErrorReason, ServerFrame};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::GatewayError;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

/// Work item for a connection's writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Utf8Bytes),
    Close,
}

/// Serialize a frame once so it can be fanned out to many connections.
pub fn encode(frame: &ServerFrame) -> Result<Utf8Bytes, GatewayError> {
    serde_json::to_string(frame)
        .map(Utf8Bytes::from)
        .map_err(|e| GatewayError::Handler(format!("encode {frame:?}: {e}")))
}

/// One live transport channel as seen by the registry.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
    identity: Mutex<Option<String>>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identity bound by a successful handshake.
    pub fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue pre-encoded text. Returns false when the connection is closed.
    pub fn send_text(&self, text: Utf8Bytes) -> bool {
        self.is_open() && self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Encode and queue a frame. Returns false when nothing was queued.
    pub fn send(&self, frame: &ServerFrame) -> bool {
        match encode(frame) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                tracing::error!(conn = self.id, err = %e, "failed to encode frame");
                false
            }
        }
    }

    /// Ask the writer to close the transport after draining queued frames.
    /// Idempotent; only the first call queues the close.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// What [`Registry::unregister`] released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Removal {
    /// The identity, when this connection was still its registered holder.
    pub identity: Option<String>,
    /// Rooms the connection was removed from.
    pub rooms: Vec<String>,
}

/// Snapshot of registry sizes for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connections: usize,
    pub authenticated: usize,
    pub rooms: usize,
    pub room_members: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    identities: HashMap<String, ConnectionId>,
    rooms: IndexMap<String, IndexSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, IndexSet<String>>,
}

impl RegistryInner {
    /// Remove `id` from `room`, deleting the room when it empties.
    fn remove_member(&mut self, id: ConnectionId, room: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.shift_remove(&id);
        if members.is_empty() {
            self.rooms.shift_remove(room);
            debug!(room, "room deleted");
        }
        removed
    }
}

/// In-memory connection, identity and room indices.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly upgraded transport. The receiver feeds its writer.
    pub fn open(&self) -> (Arc<Connection>, mpsc::UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            id,
            tx,
            open: AtomicBool::new(true),
            identity: Mutex::new(None),
        });
        self.inner.lock().connections.insert(id, Arc::clone(&conn));
        debug!(conn = id, "connection opened");
        (conn, rx)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.lock().connections.get(&id).cloned()
    }

    /// Install `conn` as the holder of `identity`.
    ///
    /// A different connection already holding the identity is told why and
    /// closed; its rooms are released by its own termination. Returns the
    /// superseded connection, if any.
    pub fn register_identity(&self, conn: &Connection, identity: &str) -> Option<Arc<Connection>> {
        let mut inner = self.inner.lock();
        *conn.identity.lock() = Some(identity.to_owned());

        let previous = inner.identities.insert(identity.to_owned(), conn.id);
        let superseded = previous
            .filter(|&prev| prev != conn.id)
            .and_then(|prev| inner.connections.get(&prev).cloned());

        if let Some(ref old) = superseded {
            old.send(&ServerFrame::error(
                ErrorReason::SessionReplaced,
                "signed in from another connection",
            ));
            old.close();
            debug!(user = identity, old = old.id, new = conn.id, "identity superseded");
        }
        debug!(user = identity, conn = conn.id, "identity registered");
        superseded
    }

    /// Remove every trace of a terminated connection.
    ///
    /// The identity entry is only removed when it still points at this
    /// connection, so a superseded connection cannot evict its replacement.
    pub fn unregister(&self, id: ConnectionId) -> Removal {
        let mut inner = self.inner.lock();
        let mut removal = Removal::default();

        let Some(conn) = inner.connections.remove(&id) else {
            return removal;
        };
        conn.open.store(false, Ordering::Release);

        if let Some(identity) = conn.identity() {
            if inner.identities.get(&identity) == Some(&id) {
                inner.identities.remove(&identity);
                removal.identity = Some(identity);
            }
        }

        let rooms = inner.memberships.remove(&id).unwrap_or_default();
        for room in rooms {
            if inner.remove_member(id, &room) {
                removal.rooms.push(room);
            }
        }

        debug!(conn = id, user = ?removal.identity, rooms = removal.rooms.len(), "connection unregistered");
        removal
    }

    /// Add a connection to a room, creating it on first join.
    ///
    /// Acknowledges the joiner with `room_joined` and notifies the other
    /// members with `user_joined` when the membership is new. Returns the
    /// member count, or `None` for an unknown connection.
    pub fn join_room(&self, id: ConnectionId, room: &str) -> Option<usize> {
        let mut inner = self.inner.lock();
        let conn = inner.connections.get(&id).cloned()?;

        let members = inner.rooms.entry(room.to_owned()).or_default();
        let added = members.insert(id);
        let count = members.len();
        let others: Vec<ConnectionId> = members.iter().copied().filter(|&m| m != id).collect();
        inner.memberships.entry(id).or_default().insert(room.to_owned());

        conn.send(&ServerFrame::RoomJoined { room: room.to_owned(), member_count: count });

        if added {
            let user_id = conn.identity().unwrap_or_default();
            let notice = ServerFrame::UserJoined { user_id, room: room.to_owned() };
            if let Ok(text) = encode(&notice) {
                for other in others {
                    if let Some(member) = inner.connections.get(&other) {
                        member.send_text(text.clone());
                    }
                }
            }
        }

        debug!(conn = id, room, members = count, "joined room");
        Some(count)
    }

    /// Remove a connection from a room. Returns whether it was a member.
    pub fn leave_room(&self, id: ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove_member(id, room);
        if let Some(rooms) = inner.memberships.get_mut(&id) {
            rooms.shift_remove(room);
            if rooms.is_empty() {
                inner.memberships.remove(&id);
            }
        }
        if removed {
            debug!(conn = id, room, "left room");
        }
        removed
    }

    /// Send a frame to every open member of `room` except `excluding`.
    ///
    /// An absent room is not an error. Returns how many members were reached.
    pub fn broadcast(
        &self,
        room: &str,
        frame: &ServerFrame,
        excluding: Option<ConnectionId>,
    ) -> Result<usize, GatewayError> {
        let inner = self.inner.lock();
        let Some(members) = inner.rooms.get(room) else {
            return Ok(0);
        };

        let text = encode(frame)?;
        let mut delivered = 0;
        for &member in members {
            if Some(member) == excluding {
                continue;
            }
            if let Some(conn) = inner.connections.get(&member) {
                if conn.send_text(text.clone()) {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }

    /// Deliver `content` to the connection holding `to`.
    ///
    /// Offline or unknown targets are dropped silently. Returns whether a
    /// frame was queued.
    pub fn direct_message(
        &self,
        from: &str,
        to: &str,
        content: serde_json::Value,
    ) -> Result<bool, GatewayError> {
        let inner = self.inner.lock();
        let Some(conn) = inner.identities.get(to).and_then(|id| inner.connections.get(id)) else {
            debug!(from, to, "direct message target offline");
            return Ok(false);
        };
        if !conn.is_open() {
            return Ok(false);
        }

        let frame = ServerFrame::DirectMessage {
            from_user_id: from.to_owned(),
            content,
            timestamp: iso8601_now(),
        };
        Ok(conn.send_text(encode(&frame)?))
    }

    /// Connection currently registered for `identity`.
    pub fn holder(&self, identity: &str) -> Option<ConnectionId> {
        self.inner.lock().identities.get(identity).copied()
    }

    /// Rooms `id` currently belongs to, in join order.
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        self.inner
            .lock()
            .memberships
            .get(&id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Members of `room`; zero when the room does not exist.
    pub fn member_count(&self, room: &str) -> usize {
        self.inner.lock().rooms.get(room).map_or(0, IndexSet::len)
    }

    pub fn has_room(&self, room: &str) -> bool {
        self.inner.lock().rooms.contains_key(room)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            connections: inner.connections.len(),
            authenticated: inner.identities.len(),
            rooms: inner.rooms.len(),
            room_members: inner
                .rooms
                .iter()
                .map(|(name, members)| (name.clone(), members.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

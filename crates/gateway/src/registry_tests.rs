// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;

/// A registered connection plus the receiving end of its writer queue.
struct Peer {
    conn: Arc<Connection>,
    rx: UnboundedReceiver<Outbound>,
}

impl Peer {
    fn open(registry: &Registry) -> Self {
        let (conn, rx) = registry.open();
        Self { conn, rx }
    }

    fn authed(registry: &Registry, identity: &str) -> Self {
        let peer = Self::open(registry);
        registry.register_identity(&peer.conn, identity);
        peer
    }

    fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Drain queued text frames as JSON.
    fn frames(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Outbound::Text(text) = item {
                out.push(serde_json::from_str(text.as_str()).unwrap_or(Value::Null));
            }
        }
        out
    }

    /// Drain the queue and report whether a close was requested.
    fn saw_close(&mut self) -> bool {
        let mut closed = false;
        while let Ok(item) = self.rx.try_recv() {
            closed |= matches!(item, Outbound::Close);
        }
        closed
    }
}

fn broadcast_frame(user: &str, room: &str, content: Value) -> ServerFrame {
    ServerFrame::Broadcast {
        user_id: user.to_owned(),
        room: room.to_owned(),
        content,
        timestamp: "2026-01-01T00:00:00.000Z".to_owned(),
    }
}

// ── identity index ────────────────────────────────────────────────────

#[test]
fn register_identity_sets_holder() {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    assert_eq!(registry.holder("u1"), Some(a.id()));
    assert_eq!(a.conn.identity().as_deref(), Some("u1"));
    assert_eq!(registry.stats().authenticated, 1);
}

#[test]
fn second_login_supersedes_and_closes_first() {
    let registry = Registry::new();
    let mut first = Peer::authed(&registry, "u1");
    let second = Peer::open(&registry);

    let superseded = registry.register_identity(&second.conn, "u1");
    assert_eq!(superseded.map(|c| c.id()), Some(first.id()));
    assert_eq!(registry.holder("u1"), Some(second.id()));
    assert!(!first.conn.is_open());

    let frames = first.frames();
    assert_eq!(frames.len(), 1, "frames: {frames:?}");
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["reason"], "session_replaced");
}

#[test]
fn superseded_connection_cannot_evict_replacement() {
    let registry = Registry::new();
    let first = Peer::authed(&registry, "u1");
    let second = Peer::authed(&registry, "u1");

    let removal = registry.unregister(first.id());
    assert_eq!(removal.identity, None);
    assert_eq!(registry.holder("u1"), Some(second.id()));
}

#[test]
fn re_registering_same_connection_is_not_superseding() {
    let registry = Registry::new();
    let mut a = Peer::authed(&registry, "u1");
    assert!(registry.register_identity(&a.conn, "u1").is_none());
    assert!(a.conn.is_open());
    assert!(!a.saw_close());
}

// ── rooms ─────────────────────────────────────────────────────────────

#[test]
fn join_creates_room_and_acks() {
    let registry = Registry::new();
    let mut a = Peer::authed(&registry, "u1");

    assert_eq!(registry.join_room(a.id(), "lobby"), Some(1));
    assert!(registry.has_room("lobby"));
    assert_eq!(a.frames(), vec![json!({"type": "room_joined", "room": "lobby", "memberCount": 1})]);
}

#[test]
fn join_notifies_existing_members_only() {
    let registry = Registry::new();
    let mut a = Peer::authed(&registry, "u1");
    let mut b = Peer::authed(&registry, "u2");
    let mut outsider = Peer::authed(&registry, "u3");
    registry.join_room(a.id(), "lobby");
    a.frames();

    assert_eq!(registry.join_room(b.id(), "lobby"), Some(2));
    assert_eq!(a.frames(), vec![json!({"type": "user_joined", "userId": "u2", "room": "lobby"})]);
    assert_eq!(b.frames(), vec![json!({"type": "room_joined", "room": "lobby", "memberCount": 2})]);
    assert!(outsider.frames().is_empty());
}

#[test]
fn rejoin_acks_without_renotifying() {
    let registry = Registry::new();
    let mut a = Peer::authed(&registry, "u1");
    let mut b = Peer::authed(&registry, "u2");
    registry.join_room(a.id(), "lobby");
    registry.join_room(b.id(), "lobby");
    a.frames();
    b.frames();

    assert_eq!(registry.join_room(b.id(), "lobby"), Some(2));
    assert!(a.frames().is_empty());
    assert_eq!(b.frames().len(), 1);
}

#[test]
fn join_unknown_connection_is_none() {
    let registry = Registry::new();
    assert_eq!(registry.join_room(999, "lobby"), None);
    assert!(!registry.has_room("lobby"));
}

#[test]
fn join_then_leave_deletes_room() {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    registry.join_room(a.id(), "R");
    assert!(registry.leave_room(a.id(), "R"));
    assert!(!registry.has_room("R"));
    assert_eq!(registry.member_count("R"), 0);
    assert_eq!(registry.room_count(), 0);
    assert!(registry.rooms_of(a.id()).is_empty());
}

#[test]
fn leave_missing_room_or_membership_is_noop() {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    let b = Peer::authed(&registry, "u2");
    assert!(!registry.leave_room(a.id(), "nowhere"));

    registry.join_room(b.id(), "lobby");
    assert!(!registry.leave_room(a.id(), "lobby"));
    assert_eq!(registry.member_count("lobby"), 1);
}

// ── broadcast ─────────────────────────────────────────────────────────

#[test]
fn broadcast_reaches_members_except_sender() -> anyhow::Result<()> {
    let registry = Registry::new();
    let mut sender = Peer::authed(&registry, "u1");
    let mut member = Peer::authed(&registry, "u2");
    let mut other_room = Peer::authed(&registry, "u3");
    registry.join_room(sender.id(), "R");
    registry.join_room(member.id(), "R");
    registry.join_room(other_room.id(), "S");
    sender.frames();
    member.frames();
    other_room.frames();

    let frame = broadcast_frame("u1", "R", json!({"text": "hello"}));
    let delivered = registry.broadcast("R", &frame, Some(sender.id()))?;

    assert_eq!(delivered, 1);
    let got = member.frames();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["type"], "broadcast");
    assert_eq!(got[0]["userId"], "u1");
    assert_eq!(got[0]["content"]["text"], "hello");
    assert!(sender.frames().is_empty());
    assert!(other_room.frames().is_empty());
    Ok(())
}

#[test]
fn broadcast_to_missing_room_is_noop() -> anyhow::Result<()> {
    let registry = Registry::new();
    let delivered = registry.broadcast("ghost", &broadcast_frame("u1", "ghost", json!(1)), None)?;
    assert_eq!(delivered, 0);
    Ok(())
}

#[test]
fn broadcast_skips_closed_members() -> anyhow::Result<()> {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    let b = Peer::authed(&registry, "u2");
    registry.join_room(a.id(), "R");
    registry.join_room(b.id(), "R");
    b.conn.close();

    let delivered = registry.broadcast("R", &broadcast_frame("u9", "R", json!(null)), None)?;
    assert_eq!(delivered, 1);
    Ok(())
}

// ── direct messages ───────────────────────────────────────────────────

#[test]
fn direct_message_delivers_to_holder() -> anyhow::Result<()> {
    let registry = Registry::new();
    let _a = Peer::authed(&registry, "u1");
    let mut b = Peer::authed(&registry, "u2");

    assert!(registry.direct_message("u1", "u2", json!({"text": "psst"}))?);
    let got = b.frames();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["type"], "direct_message");
    assert_eq!(got[0]["fromUserId"], "u1");
    assert_eq!(got[0]["content"]["text"], "psst");
    assert!(got[0]["timestamp"].is_string());
    Ok(())
}

#[test]
fn direct_message_to_offline_identity_is_silent() -> anyhow::Result<()> {
    let registry = Registry::new();
    let mut a = Peer::authed(&registry, "u1");
    assert!(!registry.direct_message("u1", "nobody", json!("hi"))?);
    assert!(a.frames().is_empty());
    Ok(())
}

#[test]
fn direct_message_after_target_closed_is_silent() -> anyhow::Result<()> {
    let registry = Registry::new();
    let b = Peer::authed(&registry, "u2");
    b.conn.close();
    assert!(!registry.direct_message("u1", "u2", json!("hi"))?);
    Ok(())
}

// ── termination ───────────────────────────────────────────────────────

#[test]
fn unregister_releases_identity_and_every_room() {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    let b = Peer::authed(&registry, "u2");
    for room in ["A", "B"] {
        registry.join_room(a.id(), room);
        registry.join_room(b.id(), room);
    }
    assert_eq!(registry.member_count("A"), 2);

    let removal = registry.unregister(a.id());
    assert_eq!(removal.identity.as_deref(), Some("u1"));
    assert_eq!(removal.rooms, vec!["A".to_owned(), "B".to_owned()]);
    assert_eq!(registry.member_count("A"), 1);
    assert_eq!(registry.member_count("B"), 1);
    assert_eq!(registry.holder("u1"), None);
    assert!(registry.connection(a.id()).is_none());
    assert!(!a.conn.is_open());
}

#[test]
fn unregister_last_member_deletes_rooms() {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    registry.join_room(a.id(), "A");
    registry.join_room(a.id(), "B");
    registry.unregister(a.id());
    assert_eq!(registry.room_count(), 0);
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn unregister_twice_is_harmless() {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    registry.unregister(a.id());
    assert_eq!(registry.unregister(a.id()), Removal::default());
}

#[test]
fn unauthenticated_connection_counts_but_has_no_identity() {
    let registry = Registry::new();
    let a = Peer::open(&registry);
    let stats = registry.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.authenticated, 0);
    assert_eq!(registry.unregister(a.id()).identity, None);
}

#[test]
fn stats_report_per_room_counts() {
    let registry = Registry::new();
    let a = Peer::authed(&registry, "u1");
    let b = Peer::authed(&registry, "u2");
    registry.join_room(a.id(), "A");
    registry.join_room(b.id(), "A");
    registry.join_room(b.id(), "B");

    let stats = registry.stats();
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.rooms, 2);
    assert_eq!(stats.room_members.get("A"), Some(&2));
    assert_eq!(stats.room_members.get("B"), Some(&1));
}

// ── invariants under churn ────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Join(usize, usize),
    Leave(usize, usize),
    Reconnect(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize, 0..3usize).prop_map(|(c, r)| Op::Join(c, r)),
        (0..4usize, 0..3usize).prop_map(|(c, r)| Op::Leave(c, r)),
        (0..4usize).prop_map(Op::Reconnect),
    ]
}

const ROOMS: [&str; 3] = ["r0", "r1", "r2"];

proptest! {
    #[test]
    fn rooms_never_empty_and_memberships_consistent(ops in proptest::collection::vec(op(), 1..60)) {
        let registry = Registry::new();
        let mut peers: Vec<Peer> =
            (0..4).map(|i| Peer::authed(&registry, &format!("u{i}"))).collect();

        for op in ops {
            match op {
                Op::Join(c, r) => { registry.join_room(peers[c].id(), ROOMS[r]); }
                Op::Leave(c, r) => { registry.leave_room(peers[c].id(), ROOMS[r]); }
                Op::Reconnect(c) => {
                    registry.unregister(peers[c].id());
                    peers[c] = Peer::authed(&registry, &format!("u{c}"));
                }
            }

            let stats = registry.stats();
            prop_assert_eq!(stats.connections, 4);
            prop_assert_eq!(stats.authenticated, 4);
            for (room, count) in &stats.room_members {
                prop_assert!(*count > 0, "room {} is empty", room);
            }
            for room in ROOMS {
                let members = peers
                    .iter()
                    .filter(|p| registry.rooms_of(p.id()).iter().any(|r| r == room))
                    .count();
                prop_assert_eq!(members, registry.member_count(room));
            }
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests that spawn the real gateway binary and drive it with
//! the client connection manager.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use pinksync_client::{
    ClientConfig, ClientError, ConnectionState, SyncClient, EVENT_CONNECTED, EVENT_ERROR,
    MIN_RECONNECT_DELAY,
};
use pinksync_specs::{unsigned_token, wait_for, GatewayProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn gateway() -> anyhow::Result<GatewayProcess> {
    let gateway = GatewayProcess::start()?;
    gateway.wait_healthy(TIMEOUT).await?;
    Ok(gateway)
}

fn client_for(gateway: &GatewayProcess, user: &str) -> SyncClient {
    SyncClient::new(
        ClientConfig::new(gateway.ws_url(), unsigned_token(user))
            .with_reconnect_delay(MIN_RECONNECT_DELAY),
    )
}

/// Collect every payload published under `event`.
fn collect(client: &SyncClient, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = client.on(event, move |v| {
        if let Ok(mut seen) = sink.lock() {
            seen.push(v.clone());
        }
    });
    seen
}

fn count(seen: &Arc<Mutex<Vec<Value>>>) -> usize {
    seen.lock().map(|s| s.len()).unwrap_or(0)
}

fn snapshot(seen: &Arc<Mutex<Vec<Value>>>) -> Vec<Value> {
    seen.lock().map(|s| s.clone()).unwrap_or_default()
}

// -- Rooms and messaging ------------------------------------------------------

#[tokio::test]
async fn broadcast_reaches_other_members_only() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let alice = client_for(&gateway, "alice");
    let bob = client_for(&gateway, "bob");
    let alice_seen = collect(&alice, "broadcast");
    let bob_seen = collect(&bob, "broadcast");
    let bob_joins = collect(&bob, "room_joined");
    let alice_joins = collect(&alice, "room_joined");
    let alice_notices = collect(&alice, "user_joined");

    assert_eq!(alice.connect().await?, "alice");
    assert_eq!(bob.connect().await?, "bob");

    alice.join_room("lobby")?;
    wait_for("alice's room_joined", TIMEOUT, || count(&alice_joins) == 1).await?;
    bob.join_room("lobby")?;
    wait_for("bob's room_joined", TIMEOUT, || count(&bob_joins) == 1).await?;
    assert_eq!(snapshot(&bob_joins)[0]["memberCount"], 2);
    wait_for("alice's user_joined notice", TIMEOUT, || count(&alice_notices) == 1).await?;
    assert_eq!(snapshot(&alice_notices)[0]["userId"], "bob");

    alice.broadcast("lobby", json!({"text": "hello"}))?;
    wait_for("bob's broadcast", TIMEOUT, || count(&bob_seen) == 1).await?;
    let frame = &snapshot(&bob_seen)[0];
    assert_eq!(frame["userId"], "alice");
    assert_eq!(frame["room"], "lobby");
    assert_eq!(frame["content"]["text"], "hello");
    assert!(frame["timestamp"].is_string());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&alice_seen), 0, "sender must not receive its own broadcast");

    alice.disconnect();
    bob.disconnect();
    Ok(())
}

#[tokio::test]
async fn direct_message_between_identities() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let alice = client_for(&gateway, "alice");
    let bob = client_for(&gateway, "bob");
    let inbox = collect(&bob, "direct_message");

    alice.connect().await?;
    bob.connect().await?;

    alice.send_direct_message("bob", json!("psst"))?;
    wait_for("direct message", TIMEOUT, || count(&inbox) == 1).await?;
    let frame = &snapshot(&inbox)[0];
    assert_eq!(frame["fromUserId"], "alice");
    assert_eq!(frame["content"], "psst");

    // Offline target: nothing comes back to the sender.
    let alice_errors = collect(&alice, "error");
    let pongs = collect(&alice, "pong");
    alice.send_direct_message("nobody", json!("hello?"))?;
    alice.ping()?;
    wait_for("pong", TIMEOUT, || count(&pongs) == 1).await?;
    assert_eq!(count(&alice_errors), 0);

    alice.disconnect();
    bob.disconnect();
    Ok(())
}

#[tokio::test]
async fn stats_reflect_connections_and_rooms() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let alice = client_for(&gateway, "alice");
    let bob = client_for(&gateway, "bob");
    let alice_joins = collect(&alice, "room_joined");
    let bob_joins = collect(&bob, "room_joined");

    alice.connect().await?;
    bob.connect().await?;
    alice.join_room("a11y")?;
    bob.join_room("a11y")?;
    wait_for("both joined", TIMEOUT, || count(&alice_joins) == 1 && count(&bob_joins) == 1)
        .await?;

    let stats = alice.get_stats().await?;
    assert_eq!(stats["connections"], 2);
    assert_eq!(stats["authenticated"], 2);
    assert_eq!(stats["rooms"], 1);
    assert_eq!(stats["room_members"]["a11y"], 2);

    bob.leave_room("a11y")?;
    alice.leave_room("a11y")?;
    let client = reqwest::Client::new();
    let url = format!("{}/stats", gateway.base_url());
    let mut emptied = false;
    for _ in 0..100 {
        let stats: Value = client.get(&url).send().await?.json().await?;
        if stats["rooms"] == 0 {
            emptied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(emptied, "room should be deleted once its last member leaves");

    alice.disconnect();
    bob.disconnect();
    Ok(())
}

// -- Handshake ----------------------------------------------------------------

#[tokio::test]
async fn rejected_token_is_not_retried() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let client = SyncClient::new(ClientConfig::new(gateway.ws_url(), "not-a-token"));
    let errors = collect(&client, EVENT_ERROR);

    let err = client.connect().await.err();
    assert!(matches!(err, Some(ClientError::AuthRejected(_))), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(MIN_RECONNECT_DELAY + Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(snapshot(&errors)[0]["reason"], "auth_rejected");
    Ok(())
}

#[tokio::test]
async fn raw_socket_must_authenticate_first() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let (mut ws, _) = tokio_tungstenite::connect_async(gateway.ws_url()).await?;

    ws.send(Message::Text(json!({"type": "join_room", "room": "R"}).to_string().into())).await?;
    let reply = next_text(&mut ws).await?;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["reason"], "not_authenticated");

    let hello = json!({"type": "authenticate", "token": unsigned_token("raw")});
    ws.send(Message::Text(hello.to_string().into())).await?;
    let reply = next_text(&mut ws).await?;
    assert_eq!(reply, json!({"type": "authenticated", "userId": "raw"}));
    Ok(())
}

async fn next_text<S>(ws: &mut S) -> anyhow::Result<Value>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match tokio::time::timeout(TIMEOUT, ws.next()).await? {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => anyhow::bail!("socket closed"),
        }
    }
}

#[tokio::test]
async fn second_login_replaces_first() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let first = client_for(&gateway, "alice");
    let second = client_for(&gateway, "alice");
    let first_errors = collect(&first, EVENT_ERROR);

    first.connect().await?;
    second.connect().await?;

    wait_for("replacement notice", TIMEOUT, || {
        snapshot(&first_errors).iter().any(|e| e["reason"] == "session_replaced")
    })
    .await?;
    wait_for("first client down", TIMEOUT, || first.state() == ConnectionState::Disconnected)
        .await?;

    // The replaced client stays down instead of fighting for the identity.
    tokio::time::sleep(MIN_RECONNECT_DELAY + Duration::from_millis(300)).await;
    assert_eq!(first.state(), ConnectionState::Disconnected);
    assert_eq!(second.state(), ConnectionState::Connected);

    second.disconnect();
    Ok(())
}

// -- Reconnect ----------------------------------------------------------------

#[tokio::test]
async fn reconnects_after_gateway_restart_and_rejoins() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let port = gateway.port();
    let client = client_for(&gateway, "alice");
    let connected = collect(&client, EVENT_CONNECTED);

    // Replay joined rooms whenever a session is (re)established.
    let replay = client.clone();
    let _sub = client.on(EVENT_CONNECTED, move |_| {
        for room in replay.rooms() {
            let _ = replay.join_room(&room);
        }
    });

    client.connect().await?;
    client.join_room("lobby")?;
    let joined = collect(&client, "room_joined");
    wait_for("joined", TIMEOUT, || count(&joined) == 1).await?;

    gateway.kill()?;
    wait_for("reconnecting", TIMEOUT, || client.state() == ConnectionState::Reconnecting).await?;

    let gateway = GatewayProcess::start_on(port)?;
    gateway.wait_healthy(TIMEOUT).await?;
    wait_for("second connected event", TIMEOUT, || count(&connected) == 2).await?;
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.reconnect_attempts(), 0);

    wait_for("room replayed", TIMEOUT, || count(&joined) == 2).await?;
    let stats = client.get_stats().await?;
    assert_eq!(stats["room_members"]["lobby"], 1);

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn gives_up_after_max_attempts() -> anyhow::Result<()> {
    let gateway = gateway().await?;
    let client = SyncClient::new(
        ClientConfig::new(gateway.ws_url(), unsigned_token("alice"))
            .with_reconnect_delay(MIN_RECONNECT_DELAY)
            .with_max_reconnect_attempts(2),
    );
    let errors = collect(&client, EVENT_ERROR);

    client.connect().await?;
    gateway.kill()?;

    wait_for("exhaustion", TIMEOUT, || {
        snapshot(&errors).iter().any(|e| e["reason"] == "reconnect_exhausted")
    })
    .await?;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.reconnect_attempts(), 2);
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! WebSocket integration tests using real connections against an in-process
//! axum server backed by the mock shell host.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use quay::test_support::{gateway_stack, spawn_ws_server, GatewayCtx};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn ws_connect(addr: &std::net::SocketAddr) -> anyhow::Result<(WsTx, WsRx)> {
    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await?;
    Ok(stream.split())
}

async fn ws_send(tx: &mut WsTx, value: &Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    tx.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| anyhow::anyhow!("ws send: {e}"))
}

async fn ws_recv(rx: &mut WsRx) -> anyhow::Result<Value> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, rx.next())
            .await
            .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
            .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
            .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;
        match msg {
            WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => anyhow::bail!("expected Text message, got {other:?}"),
        }
    }
}

/// Receive until a message with the given event name arrives.
async fn ws_recv_event(rx: &mut WsRx, event: &str) -> anyhow::Result<Value> {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        let value = ws_recv(rx).await?;
        if value["event"] == event {
            return Ok(value);
        }
    }
    anyhow::bail!("no {event} message before timeout")
}

/// Connect and consume the `connected` greeting.
async fn connect_client(
    addr: &std::net::SocketAddr,
) -> anyhow::Result<(WsTx, WsRx, String)> {
    let (tx, mut rx) = ws_connect(addr).await?;
    let connected = ws_recv_event(&mut rx, "connected").await?;
    let client_id = connected["clientId"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing clientId"))?
        .to_owned();
    Ok((tx, rx, client_id))
}

/// Create a session over the channel and return its id.
async fn create_session(tx: &mut WsTx, rx: &mut WsRx) -> anyhow::Result<String> {
    ws_send(
        tx,
        &json!({
            "event": "session:create",
            "correlationId": "cor_create",
            "projectId": "prj_test",
        }),
    )
    .await?;
    let created = ws_recv_event(rx, "session:created").await?;
    assert_eq!(created["correlationId"], "cor_create");
    created["session"]["id"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("missing session id"))
}

async fn stack() -> anyhow::Result<(GatewayCtx, std::net::SocketAddr)> {
    let ctx = gateway_stack().await;
    let (addr, _handle) = spawn_ws_server(&ctx.gateway).await?;
    Ok((ctx, addr))
}

// ---------------------------------------------------------------------------
// Connection basics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_greets_with_client_id() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (_tx, _rx, client_id) = connect_client(&addr).await?;
    assert!(client_id.starts_with("ws-"));
    Ok(())
}

#[tokio::test]
async fn ping_echoes_correlation_id() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;

    ws_send(&mut tx, &json!({"event": "ping", "correlationId": "cor_ping1"})).await?;
    let pong = ws_recv_event(&mut rx, "pong").await?;
    assert_eq!(pong["correlationId"], "cor_ping1");
    assert!(pong["timestamp"].as_u64().is_some());
    Ok(())
}

#[tokio::test]
async fn invalid_json_is_rejected() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;

    tx.send(WsMessage::Text("this is not json".into())).await?;
    let error = ws_recv_event(&mut rx, "error").await?;
    assert_eq!(error["code"], "WS_INVALID_MESSAGE");
    Ok(())
}

#[tokio::test]
async fn unknown_event_is_rejected() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;

    ws_send(&mut tx, &json!({"event": "no:such:event"})).await?;
    let error = ws_recv_event(&mut rx, "error").await?;
    assert_eq!(error["code"], "WS_INVALID_MESSAGE");
    Ok(())
}

#[tokio::test]
async fn validation_failure_names_the_field() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;

    // terminal:input without data.
    ws_send(
        &mut tx,
        &json!({"event": "terminal:input", "correlationId": "cor_v", "sessionId": "ses_x"}),
    )
    .await?;
    let error = ws_recv_event(&mut rx, "error").await?;
    assert_eq!(error["code"], "VALIDATION_FAILED");
    assert_eq!(error["correlationId"], "cor_v");
    assert!(error["message"].as_str().unwrap_or("").contains("data"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Session I/O
// ---------------------------------------------------------------------------

#[tokio::test]
async fn output_reaches_owning_client() -> anyhow::Result<()> {
    let (ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    ctx.host.emit(&session_id, b"echo HELLO\r\nHELLO\r\n").await;
    let output = ws_recv_event(&mut rx, "terminal:output").await?;
    assert_eq!(output["sessionId"], session_id.as_str());
    assert!(output["data"].as_str().unwrap_or("").contains("HELLO"));
    Ok(())
}

#[tokio::test]
async fn input_writes_through_to_shell() -> anyhow::Result<()> {
    let (ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    ws_send(
        &mut tx,
        &json!({
            "event": "terminal:input",
            "sessionId": session_id,
            "data": "echo hi\n",
        }),
    )
    .await?;

    // Round-trip a ping so the input has been dispatched.
    ws_send(&mut tx, &json!({"event": "ping"})).await?;
    ws_recv_event(&mut rx, "pong").await?;

    assert_eq!(ctx.host.written(&session_id), b"echo hi\n".to_vec());
    Ok(())
}

#[tokio::test]
async fn input_to_foreign_session_is_rejected() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx_a, mut rx_a, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx_a, &mut rx_a).await?;

    let (mut tx_b, mut rx_b, _) = connect_client(&addr).await?;
    ws_send(
        &mut tx_b,
        &json!({"event": "terminal:input", "sessionId": session_id, "data": "stolen"}),
    )
    .await?;
    let error = ws_recv_event(&mut rx_b, "error").await?;
    assert_eq!(error["code"], "SESSION_NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn terminate_replies_and_notifies() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    ws_send(
        &mut tx,
        &json!({
            "event": "session:terminate",
            "correlationId": "cor_term",
            "sessionId": session_id,
        }),
    )
    .await?;

    // The correlated reply arrives; a broadcast form may precede it.
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    let mut saw_reply = false;
    while tokio::time::Instant::now() < deadline {
        let value = ws_recv(&mut rx).await?;
        if value["event"] == "session:terminated"
            && value["correlationId"] == "cor_term"
        {
            saw_reply = true;
            break;
        }
    }
    assert!(saw_reply);
    Ok(())
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn input_flood_is_rate_limited() -> anyhow::Result<()> {
    let (ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    for _ in 0..1500 {
        ws_send(
            &mut tx,
            &json!({"event": "terminal:input", "sessionId": session_id, "data": "x"}),
        )
        .await?;
    }

    // At least one reply is WS_RATE_LIMITED.
    let mut limited = false;
    for _ in 0..500 {
        let value = ws_recv(&mut rx).await?;
        if value["event"] == "error" && value["code"] == "WS_RATE_LIMITED" {
            limited = true;
            break;
        }
    }
    assert!(limited, "expected a WS_RATE_LIMITED error");

    // Write-through stays below the number of events sent: rejected
    // events never reach the shell.
    assert!(ctx.host.write_count(&session_id) < 1500);
    Ok(())
}

#[tokio::test]
async fn resize_flood_is_dropped_silently() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    for i in 0..30u16 {
        ws_send(
            &mut tx,
            &json!({
                "event": "terminal:resize",
                "sessionId": session_id,
                "cols": 80 + i,
                "rows": 24,
            }),
        )
        .await?;
    }

    // No error replies for the overflow; the next ping answers directly.
    ws_send(&mut tx, &json!({"event": "ping", "correlationId": "cor_after"})).await?;
    let next = ws_recv(&mut rx).await?;
    assert_eq!(next["event"], "pong");
    assert_eq!(next["correlationId"], "cor_after");
    Ok(())
}

// ---------------------------------------------------------------------------
// Reconnect protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_replays_missed_output() -> anyhow::Result<()> {
    let (ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    ctx.host.emit(&session_id, b"line one\nline two\nline three\n").await;
    ws_recv_event(&mut rx, "terminal:output").await?;

    // Drop the channel; the session survives and keeps producing.
    drop(tx);
    drop(rx);
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.host.emit(&session_id, b"missed after drop\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Fresh channel reconnects to the session.
    let (mut tx2, mut rx2, _) = connect_client(&addr).await?;
    ws_send(
        &mut tx2,
        &json!({
            "event": "terminal:reconnect",
            "correlationId": "cor_rc",
            "sessionId": session_id,
        }),
    )
    .await?;

    let response = ws_recv_event(&mut rx2, "terminal:reconnect:response").await?;
    assert_eq!(response["success"], true);
    assert_eq!(response["correlationId"], "cor_rc");
    assert!(response["bufferedOutput"]
        .as_str()
        .unwrap_or("")
        .contains("missed after drop"));

    // The replay message follows the response on the same channel.
    let replay = ws_recv(&mut rx2).await?;
    assert_eq!(replay["event"], "terminal:buffer");
    assert_eq!(replay["isReplay"], true);
    assert!(replay["data"].as_str().unwrap_or("").contains("missed after drop"));
    Ok(())
}

#[tokio::test]
async fn reconnect_of_unknown_session_fails_cleanly() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;

    ws_send(
        &mut tx,
        &json!({"event": "terminal:reconnect", "sessionId": "ses_missing"}),
    )
    .await?;
    let response = ws_recv_event(&mut rx, "terminal:reconnect:response").await?;
    assert_eq!(response["success"], false);
    Ok(())
}

#[tokio::test]
async fn bulk_reconnect_lists_buffers_then_replays() -> anyhow::Result<()> {
    let (ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    drop(tx);
    drop(rx);
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctx.host.emit(&session_id, b"post disconnect\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (mut tx2, mut rx2, _) = connect_client(&addr).await?;
    ws_send(
        &mut tx2,
        &json!({
            "event": "reconnect",
            "correlationId": "cor_bulk",
            "sessionIds": [session_id, "ses_gone"],
        }),
    )
    .await?;

    let response = ws_recv_event(&mut rx2, "reconnect").await?;
    assert_eq!(response["correlationId"], "cor_bulk");
    assert_eq!(response["activeSessions"].as_array().map(Vec::len), Some(1));
    assert_eq!(response["terminatedSessions"], json!(["ses_gone"]));
    assert_eq!(response["buffers"][0]["sessionId"], session_id.as_str());
    assert!(response["buffers"][0]["outputSinceDisconnect"]
        .as_str()
        .unwrap_or("")
        .contains("post disconnect"));

    let replay = ws_recv(&mut rx2).await?;
    assert_eq!(replay["event"], "terminal:buffer");
    assert_eq!(replay["isReplay"], true);
    Ok(())
}

#[tokio::test]
async fn reconnect_steals_fanout_from_previous_owner() -> anyhow::Result<()> {
    let (ctx, addr) = stack().await?;
    let (mut tx_a, mut rx_a, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx_a, &mut rx_a).await?;

    // Client B takes the session over while A is still connected.
    let (mut tx_b, mut rx_b, _) = connect_client(&addr).await?;
    ws_send(
        &mut tx_b,
        &json!({"event": "terminal:reconnect", "sessionId": session_id}),
    )
    .await?;
    let response = ws_recv_event(&mut rx_b, "terminal:reconnect:response").await?;
    assert_eq!(response["success"], true);

    ctx.host.emit(&session_id, b"for the new owner\n").await;

    // B receives the output.
    let output = ws_recv_event(&mut rx_b, "terminal:output").await?;
    assert!(output["data"].as_str().unwrap_or("").contains("for the new owner"));

    // A receives nothing further for this session.
    let leaked = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            if let Ok(value) = ws_recv(&mut rx_a).await {
                if value["event"] == "terminal:output" {
                    return value;
                }
            }
        }
    })
    .await;
    assert!(leaked.is_err(), "previous owner still received output: {leaked:?}");
    drop(tx_a);
    Ok(())
}

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_change_fans_out_to_owner() -> anyhow::Result<()> {
    let (ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;
    let session_id = create_session(&mut tx, &mut rx).await?;

    ctx.host.emit(&session_id, b"Password: ").await;

    let change = ws_recv_event(&mut rx, "status:change").await?;
    assert_eq!(change["sessionId"], session_id.as_str());
    assert_eq!(change["previousStatus"], "idle");
    assert_eq!(change["newStatus"], "waiting");
    assert_eq!(change["matchedPattern"], "SSH password prompt");
    Ok(())
}

#[tokio::test]
async fn pattern_registry_events_roundtrip() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;

    ws_send(
        &mut tx,
        &json!({
            "event": "status:pattern:add",
            "correlationId": "cor_add",
            "id": "my-marker",
            "name": "my marker",
            "pattern": "MARKER",
            "status": "working",
            "priority": 999,
        }),
    )
    .await?;
    let added = ws_recv_event(&mut rx, "status:pattern:add").await?;
    assert_eq!(added["success"], true);

    ws_send(&mut tx, &json!({"event": "status:patterns:list"})).await?;
    let listing = ws_recv_event(&mut rx, "status:patterns:list").await?;
    let patterns = listing["patterns"].as_array().cloned().unwrap_or_default();
    assert!(patterns.iter().any(|p| p["id"] == "my-marker"));

    ws_send(
        &mut tx,
        &json!({"event": "status:pattern:remove", "patternId": "my-marker"}),
    )
    .await?;
    let removed = ws_recv_event(&mut rx, "status:pattern:remove").await?;
    assert_eq!(removed["removed"], true);
    Ok(())
}

#[tokio::test]
async fn invalid_pattern_regex_is_validation_failure() -> anyhow::Result<()> {
    let (_ctx, addr) = stack().await?;
    let (mut tx, mut rx, _) = connect_client(&addr).await?;

    ws_send(
        &mut tx,
        &json!({
            "event": "status:pattern:add",
            "id": "broken",
            "name": "broken",
            "pattern": "([unclosed",
            "status": "error",
            "priority": 1,
        }),
    )
    .await?;
    let error = ws_recv_event(&mut rx, "error").await?;
    assert_eq!(error["code"], "VALIDATION_FAILED");
    Ok(())
}

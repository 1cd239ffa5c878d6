// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! End-to-end smoke tests against the real binary and a real tmux server.
//!
//! All tests skip quietly when tmux is not installed (the binary refuses to
//! start without it).

use std::time::Duration;

use serde_json::json;

use quay_specs::{smoke_ready, Server};

/// Create a project and a session, returning the session id.
async fn create_session(channel: &mut quay_specs::Channel) -> anyhow::Result<String> {
    channel
        .send(&json!({
            "event": "project:create",
            "correlationId": "cor_prj",
            "name": "smoke",
            "path": "/tmp",
        }))
        .await?;
    let created = channel.recv_event("project:created").await?;
    let project_id = created["project"]["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing project id"))?
        .to_owned();

    channel
        .send(&json!({
            "event": "session:create",
            "correlationId": "cor_ses",
            "projectId": project_id,
            "shell": "sh",
        }))
        .await?;
    let created = channel.recv_event("session:created").await?;
    created["session"]["id"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("missing session id"))
}

#[tokio::test]
async fn connect_and_ping() -> anyhow::Result<()> {
    if !smoke_ready() {
        eprintln!("tmux or binary not available, skipping");
        return Ok(());
    }
    let server = Server::spawn().await?;
    let mut channel = server.connect().await?;

    channel.send(&json!({"event": "ping", "correlationId": "cor_p"})).await?;
    let pong = channel.recv_event("pong").await?;
    assert_eq!(pong["correlationId"], "cor_p");
    Ok(())
}

#[tokio::test]
async fn roundtrip_echo() -> anyhow::Result<()> {
    if !smoke_ready() {
        eprintln!("tmux or binary not available, skipping");
        return Ok(());
    }
    let server = Server::spawn().await?;
    let mut channel = server.connect().await?;
    let session_id = create_session(&mut channel).await?;

    channel
        .send(&json!({
            "event": "terminal:input",
            "sessionId": session_id,
            "data": "echo HEL''LO\n",
        }))
        .await?;

    // The quoting keeps the command's own echo from matching.
    let output = channel
        .collect_output_until(&session_id, "HELLO", Duration::from_secs(2))
        .await?;
    assert!(output.contains("HELLO"));
    Ok(())
}

#[tokio::test]
async fn reconnect_replays_output_after_drop() -> anyhow::Result<()> {
    if !smoke_ready() {
        eprintln!("tmux or binary not available, skipping");
        return Ok(());
    }
    let server = Server::spawn().await?;
    let mut channel = server.connect().await?;
    let session_id = create_session(&mut channel).await?;

    // Drive some output into the buffer first.
    channel
        .send(&json!({
            "event": "terminal:input",
            "sessionId": session_id,
            "data": "for i in 1 2 3; do echo line-$i; done\n",
        }))
        .await?;
    channel
        .collect_output_until(&session_id, "line-3", Duration::from_secs(2))
        .await?;

    // Drop the channel, produce output nobody is listening to.
    drop(channel);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut fresh = server.connect().await?;
    fresh
        .send(&json!({
            "event": "terminal:input",
            "sessionId": session_id,
            "data": "echo MIS''SED\n",
        }))
        .await?;
    // The fresh channel does not own the session yet.
    let error = fresh.recv_event("error").await?;
    assert_eq!(error["code"], "SESSION_NOT_FOUND");

    fresh
        .send(&json!({
            "event": "terminal:reconnect",
            "correlationId": "cor_rc",
            "sessionId": session_id,
        }))
        .await?;
    let response = fresh.recv_event("terminal:reconnect:response").await?;
    assert_eq!(response["success"], true);

    // Input works again after taking ownership.
    fresh
        .send(&json!({
            "event": "terminal:input",
            "sessionId": session_id,
            "data": "echo MIS''SED\n",
        }))
        .await?;
    fresh
        .collect_output_until(&session_id, "MISSED", Duration::from_secs(2))
        .await?;
    Ok(())
}

#[tokio::test]
async fn session_list_reflects_created_sessions() -> anyhow::Result<()> {
    if !smoke_ready() {
        eprintln!("tmux or binary not available, skipping");
        return Ok(());
    }
    let server = Server::spawn().await?;
    let mut channel = server.connect().await?;
    let session_id = create_session(&mut channel).await?;

    channel
        .send(&json!({"event": "session:list", "correlationId": "cor_ls"}))
        .await?;
    let listing = channel.recv_event("session:list:response").await?;
    let sessions = listing["sessions"].as_array().cloned().unwrap_or_default();
    assert!(sessions.iter().any(|s| s["id"] == session_id.as_str()));
    Ok(())
}

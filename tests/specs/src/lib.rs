// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `quay` binary as a subprocess with an isolated tmux
//! server and SQLite file, and exercises it over the WebSocket channel.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Resolve the path to the compiled `quay` binary.
pub fn quay_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("quay")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Whether tmux is runnable on this machine.
pub fn tmux_available() -> bool {
    Command::new("tmux")
        .arg("-V")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Whether the smoke-test prerequisites (tmux + compiled binary) are there.
pub fn smoke_ready() -> bool {
    tmux_available() && quay_binary().exists()
}

/// A running `quay` server with its scratch directory.
pub struct Server {
    pub port: u16,
    child: Child,
    tmux_socket: PathBuf,
    _dir: tempfile::TempDir,
}

impl Server {
    /// Spawn the binary against isolated state and wait for the channel to
    /// come up.
    pub async fn spawn() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let port = free_port()?;
        let tmux_socket = dir.path().join("tmux.sock");

        let child = Command::new(quay_binary())
            .env("PORT", port.to_string())
            .env("HOST", "127.0.0.1")
            .env("QUAY_DB_PATH", dir.path().join("quay.db"))
            .env("QUAY_VAULT_PATH", dir.path().join("vault.json"))
            .env("QUAY_TMUX_SOCKET", &tmux_socket)
            .env("LOG_LEVEL", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let server = Self { port, child, tmux_socket, _dir: dir };
        server.wait_ready().await?;
        Ok(server)
    }

    /// Poll until a WebSocket connection succeeds.
    async fn wait_ready(&self) -> anyhow::Result<()> {
        let url = format!("ws://127.0.0.1:{}/ws", self.port);
        for _ in 0..100 {
            if let Ok((mut stream, _)) = tokio_tungstenite::connect_async(&url).await {
                let _ = stream.close(None).await;
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server did not come up on port {}", self.port)
    }

    /// Open a client channel and consume the `connected` greeting.
    pub async fn connect(&self) -> anyhow::Result<Channel> {
        let url = format!("ws://127.0.0.1:{}/ws", self.port);
        let (stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (tx, rx) = stream.split();
        let mut channel = Channel { tx, rx };
        let greeting = channel.recv_event("connected").await?;
        anyhow::ensure!(greeting["clientId"].is_string(), "missing clientId");
        Ok(channel)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = Command::new("tmux")
            .args(["-S"])
            .arg(&self.tmux_socket)
            .args(["kill-server"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A connected event channel.
pub struct Channel {
    tx: futures_util::stream::SplitSink<WsStream, WsMessage>,
    rx: futures_util::stream::SplitStream<WsStream>,
}

impl Channel {
    pub async fn send(&mut self, value: &Value) -> anyhow::Result<()> {
        let text = serde_json::to_string(value)?;
        self.tx
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| anyhow::anyhow!("ws send: {e}"))
    }

    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.rx.next())
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
    pub async fn recv_event(&mut self, event: &str) -> anyhow::Result<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            let value = self.recv().await?;
            if value["event"] == event {
                return Ok(value);
            }
        }
        anyhow::bail!("no {event} message before timeout")
    }

    /// Collect `terminal:output` data for a session until `needle` shows up.
    pub async fn collect_output_until(
        &mut self,
        session_id: &str,
        needle: &str,
        timeout: Duration,
    ) -> anyhow::Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut collected = String::new();
        while tokio::time::Instant::now() < deadline {
            let remaining = deadline - tokio::time::Instant::now();
            let Ok(result) = tokio::time::timeout(remaining, self.recv()).await else {
                break;
            };
            let value = result?;
            if value["event"] == "terminal:output" && value["sessionId"] == session_id {
                collected.push_str(value["data"].as_str().unwrap_or(""));
                if collected.contains(needle) {
                    return Ok(collected);
                }
            }
        }
        anyhow::bail!("output never contained {needle:?}; got: {collected:?}")
    }
}

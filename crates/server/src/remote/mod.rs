// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Remote (SSH) shells.
//!
//! The pool implements [`ShellHost`] so that the session manager drives
//! remote shells exactly like tmux-hosted ones. Connecting is pool-specific
//! because it needs credentials and, for keyboard-interactive auth, a
//! round-trip to the owning client mid-handshake.

pub mod client;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, GatewayError};
use crate::events::now_ms;
use crate::host::{HostEvent, ShellHost, ShellInfo, ShellSpawnSpec};

/// Persisted connection parameters. Secrets never live here; they come from
/// the request payload or the credential vault at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshDescriptor {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// `password`, `private-key`, or `keyboard-interactive`.
    pub auth_method: String,
    pub cols: u16,
    pub rows: u16,
}

fn default_port() -> u16 {
    22
}

/// Secrets used during the handshake, held only in memory.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey { pem: String, passphrase: Option<String> },
    KeyboardInteractive,
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("SshAuth::Password"),
            Self::PrivateKey { .. } => f.write_str("SshAuth::PrivateKey"),
            Self::KeyboardInteractive => f.write_str("SshAuth::KeyboardInteractive"),
        }
    }
}

/// A keyboard-interactive round surfaced to the owning client.
///
/// The connect task parks on `reply` until the client answers (or the
/// gateway drops the sender, failing the handshake).
#[derive(Debug)]
pub struct InteractivePrompt {
    pub name: String,
    pub instructions: String,
    /// Prompt text plus whether the answer should be echoed.
    pub prompts: Vec<(String, bool)>,
    pub reply: oneshot::Sender<Vec<String>>,
}

/// Input accepted by a live remote shell's channel task.
#[derive(Debug)]
pub enum RemoteInput {
    Data(Bytes),
    Resize(u16, u16),
    Close,
}

struct RemoteEntry {
    input_tx: mpsc::Sender<RemoteInput>,
    created_at: u64,
}

/// Established outcome of a connect, reported to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOutcome {
    pub host_key_fingerprint: Option<String>,
}

/// All live SSH-backed shells.
pub struct RemoteShellPool {
    events_tx: mpsc::Sender<HostEvent>,
    shells: tokio::sync::Mutex<HashMap<String, RemoteEntry>>,
    connect_timeout: Duration,
    shutdown: CancellationToken,
}

impl RemoteShellPool {
    pub fn new(events_tx: mpsc::Sender<HostEvent>) -> Self {
        Self {
            events_tx,
            shells: tokio::sync::Mutex::new(HashMap::new()),
            connect_timeout: Duration::from_secs(15),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Establish a connection, authenticate, and open a PTY + shell channel
    /// under `name`. Keyboard-interactive rounds are relayed through
    /// `interactive` when provided.
    pub async fn connect(
        &self,
        name: &str,
        desc: &SshDescriptor,
        auth: SshAuth,
        interactive: Option<mpsc::Sender<InteractivePrompt>>,
    ) -> Result<ConnectOutcome, GatewayError> {
        let connection = client::establish(
            desc,
            auth,
            interactive,
            self.connect_timeout,
            self.events_tx.clone(),
            name.to_owned(),
            self.shutdown.child_token(),
        )
        .await?;

        let mut shells = self.shells.lock().await;
        shells.insert(
            name.to_owned(),
            RemoteEntry { input_tx: connection.input_tx, created_at: now_ms() },
        );
        Ok(ConnectOutcome { host_key_fingerprint: connection.host_key_fingerprint })
    }

    async fn input_tx(&self, name: &str) -> Option<mpsc::Sender<RemoteInput>> {
        self.shells.lock().await.get(name).map(|e| e.input_tx.clone())
    }
}

#[async_trait]
impl ShellHost for RemoteShellPool {
    async fn spawn(&self, _name: &str, _spec: &ShellSpawnSpec) -> anyhow::Result<()> {
        anyhow::bail!("remote shells are established via connect")
    }

    async fn attach(&self, _name: &str) -> anyhow::Result<()> {
        anyhow::bail!("remote shells do not survive a restart")
    }

    async fn write(&self, name: &str, data: &[u8]) -> anyhow::Result<()> {
        let tx = self
            .input_tx(name)
            .await
            .ok_or_else(|| anyhow::anyhow!("no remote shell named {name}"))?;
        tx.send(RemoteInput::Data(Bytes::copy_from_slice(data)))
            .await
            .map_err(|_| anyhow::anyhow!("remote shell {name} is gone"))
    }

    async fn resize(&self, name: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        let tx = self
            .input_tx(name)
            .await
            .ok_or_else(|| anyhow::anyhow!("no remote shell named {name}"))?;
        tx.send(RemoteInput::Resize(cols, rows))
            .await
            .map_err(|_| anyhow::anyhow!("remote shell {name} is gone"))
    }

    async fn kill(&self, name: &str) -> anyhow::Result<()> {
        let entry = self.shells.lock().await.remove(name);
        if let Some(entry) = entry {
            let _ = entry.input_tx.send(RemoteInput::Close).await;
        }
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<ShellInfo>> {
        let shells = self.shells.lock().await;
        Ok(shells
            .iter()
            .map(|(name, entry)| ShellInfo {
                name: name.clone(),
                created_at: Some(entry.created_at / 1000),
            })
            .collect())
    }

    async fn alive(&self, name: &str) -> bool {
        self.shells.lock().await.contains_key(name)
    }

    async fn destroy(&self) {
        self.shutdown.cancel();
        self.shells.lock().await.clear();
    }
}

/// Map an SSH failure into the wire error taxonomy.
pub(crate) fn connect_error(message: impl Into<String>, code: ErrorCode) -> GatewayError {
    GatewayError::new(code, message)
}

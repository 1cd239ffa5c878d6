// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Abstraction over the external shell host.
//!
//! A shell host owns long-lived shells addressable by name. Shells survive
//! this process restarting; `list` drives recovery at startup. Output is
//! delivered through a single [`HostEvent`] channel fed by one independent
//! reader task per shell, so a stalled shell never blocks its siblings.

pub mod tmux;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

/// Spawn parameters for a local shell.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellSpawnSpec {
    /// Shell program, e.g. `bash` or `zsh`.
    pub shell: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment frozen at creation time.
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

/// A live shell known to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInfo {
    /// The host-side name, equal to the owning session id.
    pub name: String,
    /// Creation time (epoch seconds) when the host reports one.
    pub created_at: Option<u64>,
}

/// Events delivered from the host's reader tasks.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// Raw bytes produced by a shell.
    Output { name: String, data: Bytes },
    /// The shell's program exited (or the shell disappeared).
    Exited { name: String, exit_code: Option<i32> },
}

/// Shell host capability. Implemented by the tmux host and by the
/// in-memory mock used in tests.
#[async_trait]
pub trait ShellHost: Send + Sync {
    /// Spawn a new shell under `name` and start its reader task.
    async fn spawn(&self, name: &str, spec: &ShellSpawnSpec) -> anyhow::Result<()>;

    /// Re-attach to an existing shell after a restart, starting a reader.
    async fn attach(&self, name: &str) -> anyhow::Result<()>;

    /// Write raw input to a shell.
    async fn write(&self, name: &str, data: &[u8]) -> anyhow::Result<()>;

    /// Resize a shell's terminal.
    async fn resize(&self, name: &str, cols: u16, rows: u16) -> anyhow::Result<()>;

    /// Kill a shell. The host entry disappears from `list`.
    async fn kill(&self, name: &str) -> anyhow::Result<()>;

    /// Enumerate shells owned by this host.
    async fn list(&self) -> anyhow::Result<Vec<ShellInfo>>;

    /// Whether the named shell is still live.
    async fn alive(&self, name: &str) -> bool;

    /// Stop all reader tasks and release resources. Shells stay alive so a
    /// restarted process can re-adopt them. Idempotent.
    async fn destroy(&self);
}

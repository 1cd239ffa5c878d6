// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! tmux-backed shell host.
//!
//! Shells live as sessions on a dedicated tmux server (isolated via
//! `-S <socket>` when configured) under a fixed name prefix. Raw output is
//! obtained with `pipe-pane` into a per-shell FIFO; one reader task per
//! shell forwards bytes to the host event channel. The tmux server outlives
//! this process, which is what makes session recovery possible.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use nix::sys::stat::Mode;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HostEvent, ShellHost, ShellInfo, ShellSpawnSpec};

/// Prefix applied to tmux session names so `list` can tell our shells from
/// anything else living on the same server.
const NAME_PREFIX: &str = "quay-";

pub struct TmuxHost {
    socket: Option<PathBuf>,
    /// Directory holding per-shell output FIFOs.
    pipe_dir: PathBuf,
    events_tx: mpsc::Sender<HostEvent>,
    readers: tokio::sync::Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl TmuxHost {
    /// Create a host. Verifies tmux is runnable and prepares the FIFO dir.
    pub async fn new(
        socket: Option<PathBuf>,
        pipe_dir: PathBuf,
        events_tx: mpsc::Sender<HostEvent>,
    ) -> anyhow::Result<Arc<Self>> {
        tokio::fs::create_dir_all(&pipe_dir).await?;

        let host = Arc::new(Self {
            socket,
            pipe_dir,
            events_tx,
            readers: tokio::sync::Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        // `tmux -V` both checks the binary exists and warms the server path.
        let out = host.tmux().arg("-V").output().await;
        match out {
            Ok(out) if out.status.success() => Ok(host),
            Ok(_) => anyhow::bail!("tmux -V failed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("tmux is not installed or not in PATH")
            }
            Err(e) => Err(anyhow::Error::new(e).context("failed to run tmux")),
        }
    }

    fn tmux(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("tmux");
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd
    }

    fn target(name: &str) -> String {
        format!("{NAME_PREFIX}{name}")
    }

    fn fifo_path(&self, name: &str) -> PathBuf {
        self.pipe_dir.join(format!("{name}.out"))
    }

    /// Point `pipe-pane` at the shell's FIFO and spawn the reader task.
    async fn start_reader(&self, name: &str) -> anyhow::Result<()> {
        let fifo = self.fifo_path(name);
        match nix::unistd::mkfifo(&fifo, Mode::from_bits_truncate(0o600)) {
            Ok(()) => {}
            Err(nix::errno::Errno::EEXIST) => {}
            Err(e) => return Err(anyhow::anyhow!("mkfifo {}: {e}", fifo.display())),
        }

        let target = Self::target(name);
        let status = self
            .tmux()
            .args(["pipe-pane", "-t", &target])
            .arg(format!("cat >> '{}'", fifo.display()))
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("tmux pipe-pane failed for {target}");
        }

        let cancel = self.shutdown.child_token();
        {
            let mut readers = self.readers.lock().await;
            if let Some(old) = readers.insert(name.to_owned(), cancel.clone()) {
                old.cancel();
            }
        }

        let events_tx = self.events_tx.clone();
        let shell_name = name.to_owned();
        tokio::spawn(async move {
            let mut file = match tokio::fs::File::open(&fifo).await {
                Ok(f) => f,
                Err(error) => {
                    warn!(shell = %shell_name, %error, "failed to open output pipe");
                    return;
                }
            };
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = file.read(&mut buf) => {
                        match read {
                            Ok(0) => {
                                // Writer closed: the pane's program exited or
                                // pipe-pane was turned off.
                                let _ = events_tx
                                    .send(HostEvent::Exited {
                                        name: shell_name.clone(),
                                        exit_code: None,
                                    })
                                    .await;
                                break;
                            }
                            Ok(n) => {
                                let data = Bytes::copy_from_slice(&buf[..n]);
                                if events_tx
                                    .send(HostEvent::Output { name: shell_name.clone(), data })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(error) => {
                                warn!(shell = %shell_name, %error, "output pipe read failed");
                                break;
                            }
                        }
                    }
                }
            }
            debug!(shell = %shell_name, "reader task stopped");
        });

        Ok(())
    }
}

#[async_trait]
impl ShellHost for TmuxHost {
    async fn spawn(&self, name: &str, spec: &ShellSpawnSpec) -> anyhow::Result<()> {
        let target = Self::target(name);
        let mut cmd = self.tmux();
        cmd.args(["new-session", "-d", "-s", &target]);
        cmd.args(["-x", &spec.cols.to_string(), "-y", &spec.rows.to_string()]);
        if let Some(ref cwd) = spec.cwd {
            cmd.arg("-c").arg(cwd);
        }
        for (key, value) in &spec.env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(&spec.shell);

        let status = cmd.status().await?;
        if !status.success() {
            anyhow::bail!("tmux new-session failed for {target}");
        }

        self.start_reader(name).await
    }

    async fn attach(&self, name: &str) -> anyhow::Result<()> {
        if !self.alive(name).await {
            anyhow::bail!("tmux session {} does not exist", Self::target(name));
        }
        self.start_reader(name).await
    }

    async fn write(&self, name: &str, data: &[u8]) -> anyhow::Result<()> {
        let target = Self::target(name);
        let text = String::from_utf8_lossy(data).into_owned();
        let status = self
            .tmux()
            .args(["send-keys", "-l", "-t", &target])
            .arg(text)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("tmux send-keys failed for {target}");
        }
        Ok(())
    }

    async fn resize(&self, name: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        let target = Self::target(name);
        let status = self
            .tmux()
            .args([
                "resize-pane",
                "-t",
                &target,
                "-x",
                &cols.to_string(),
                "-y",
                &rows.to_string(),
            ])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("tmux resize-pane failed for {target}");
        }
        Ok(())
    }

    async fn kill(&self, name: &str) -> anyhow::Result<()> {
        if let Some(cancel) = self.readers.lock().await.remove(name) {
            cancel.cancel();
        }
        let fifo = self.fifo_path(name);
        let _ = tokio::fs::remove_file(&fifo).await;

        let target = Self::target(name);
        let status = self
            .tmux()
            .args(["kill-session", "-t", &target])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("tmux kill-session failed for {target}");
        }
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<ShellInfo>> {
        let out = self
            .tmux()
            .args(["list-sessions", "-F", "#{session_name} #{session_created}"])
            .output()
            .await?;
        // No server running means no sessions, not an error.
        if !out.status.success() {
            return Ok(Vec::new());
        }

        let text = String::from_utf8_lossy(&out.stdout);
        let mut shells = Vec::new();
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let Some(session_name) = fields.next() else {
                continue;
            };
            let Some(name) = session_name.strip_prefix(NAME_PREFIX) else {
                continue;
            };
            let created_at = fields.next().and_then(|s| s.parse().ok());
            shells.push(ShellInfo { name: name.to_owned(), created_at });
        }
        Ok(shells)
    }

    async fn alive(&self, name: &str) -> bool {
        let target = Self::target(name);
        self.tmux()
            .args(["has-session", "-t", &target])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn destroy(&self) {
        self.shutdown.cancel();
        self.readers.lock().await.clear();
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Shared test infrastructure: in-memory shell host, event capture sinks,
//! and a builder wiring a full manager + gateway stack without tmux.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::buffer::BufferEngine;
use crate::events::{
    LifecycleEvent, OutputEvent, SessionSinks, StatusChangeEvent, TerminationEvent,
};
use crate::host::{HostEvent, ShellHost, ShellInfo, ShellSpawnSpec};
use crate::remote::RemoteShellPool;
use crate::session::SessionManager;
use crate::status::{DetectorConfig, StatusDetector};
use crate::store::Store;

/// In-memory shell host. Tests inject output with [`MockShellHost::emit`]
/// and inspect writes with [`MockShellHost::written`].
pub struct MockShellHost {
    events_tx: mpsc::Sender<HostEvent>,
    shells: Mutex<HashMap<String, ShellInfo>>,
    writes: Mutex<Vec<(String, Vec<u8>)>>,
    fail_spawn: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockShellHost {
    pub fn new(events_tx: mpsc::Sender<HostEvent>) -> Arc<Self> {
        Arc::new(Self {
            events_tx,
            shells: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            fail_spawn: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::Relaxed);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Pre-populate a shell, as if it survived a restart.
    pub fn add_shell(&self, name: &str) {
        self.shells
            .lock()
            .unwrap()
            .insert(name.to_owned(), ShellInfo { name: name.to_owned(), created_at: Some(1) });
    }

    /// Inject output as if the shell produced it.
    pub async fn emit(&self, name: &str, data: &[u8]) {
        let _ = self
            .events_tx
            .send(HostEvent::Output {
                name: name.to_owned(),
                data: Bytes::copy_from_slice(data),
            })
            .await;
    }

    /// Inject a shell exit.
    pub async fn emit_exit(&self, name: &str, exit_code: Option<i32>) {
        let _ = self
            .events_tx
            .send(HostEvent::Exited { name: name.to_owned(), exit_code })
            .await;
    }

    /// All writes delivered to a shell, concatenated.
    pub fn written(&self, name: &str) -> Vec<u8> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .flat_map(|(_, d)| d.iter().copied())
            .collect()
    }

    pub fn write_count(&self, name: &str) -> usize {
        self.writes.lock().unwrap().iter().filter(|(n, _)| n == name).count()
    }
}

#[async_trait]
impl ShellHost for MockShellHost {
    async fn spawn(&self, name: &str, _spec: &ShellSpawnSpec) -> anyhow::Result<()> {
        if self.fail_spawn.load(Ordering::Relaxed) {
            anyhow::bail!("mock spawn failure");
        }
        self.add_shell(name);
        Ok(())
    }

    async fn attach(&self, name: &str) -> anyhow::Result<()> {
        if self.shells.lock().unwrap().contains_key(name) {
            Ok(())
        } else {
            anyhow::bail!("no shell named {name}")
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            anyhow::bail!("mock write failure");
        }
        if !self.shells.lock().unwrap().contains_key(name) {
            anyhow::bail!("no shell named {name}");
        }
        self.writes.lock().unwrap().push((name.to_owned(), data.to_vec()));
        Ok(())
    }

    async fn resize(&self, name: &str, _cols: u16, _rows: u16) -> anyhow::Result<()> {
        if !self.shells.lock().unwrap().contains_key(name) {
            anyhow::bail!("no shell named {name}");
        }
        Ok(())
    }

    async fn kill(&self, name: &str) -> anyhow::Result<()> {
        self.shells.lock().unwrap().remove(name);
        let _ = self
            .events_tx
            .send(HostEvent::Exited { name: name.to_owned(), exit_code: Some(0) })
            .await;
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<ShellInfo>> {
        Ok(self.shells.lock().unwrap().values().cloned().collect())
    }

    async fn alive(&self, name: &str) -> bool {
        self.shells.lock().unwrap().contains_key(name)
    }

    async fn destroy(&self) {}
}

/// Captured sink events for assertions.
#[derive(Default)]
pub struct CapturedEvents {
    pub outputs: Mutex<Vec<OutputEvent>>,
    pub status_changes: Mutex<Vec<StatusChangeEvent>>,
    pub lifecycles: Mutex<Vec<LifecycleEvent>>,
    pub terminations: Mutex<Vec<TerminationEvent>>,
}

impl CapturedEvents {
    pub fn sinks(self: &Arc<Self>) -> SessionSinks {
        let outputs = Arc::clone(self);
        let status = Arc::clone(self);
        let lifecycle = Arc::clone(self);
        let termination = Arc::clone(self);
        SessionSinks {
            on_output: Arc::new(move |e| outputs.outputs.lock().unwrap().push(e)),
            on_status_change: Arc::new(move |e| {
                status.status_changes.lock().unwrap().push(e)
            }),
            on_lifecycle: Arc::new(move |e| lifecycle.lifecycles.lock().unwrap().push(e)),
            on_termination: Arc::new(move |e| {
                termination.terminations.lock().unwrap().push(e)
            }),
        }
    }

    /// Concatenated output bytes for one session.
    pub fn output_bytes(&self, session_id: &str) -> Vec<u8> {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.session_id == session_id)
            .flat_map(|e| e.data.iter().copied())
            .collect()
    }
}

/// A fully wired manager over mocks, plus the handles tests poke at.
pub struct ManagerCtx {
    pub manager: Arc<SessionManager>,
    pub host: Arc<MockShellHost>,
    pub buffers: Arc<BufferEngine>,
    pub detector: Arc<StatusDetector>,
    pub store: Option<Arc<Store>>,
    pub captured: Arc<CapturedEvents>,
}

/// Builder for a manager stack backed by the mock host.
pub struct ManagerBuilder {
    max_lines: usize,
    store: Option<Arc<Store>>,
    seed_project: Option<String>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self { max_lines: 100, store: None, seed_project: None }
    }

    pub fn max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    pub fn with_store(mut self) -> Self {
        let store = Arc::new(Store::open_in_memory().unwrap());
        self.store = Some(store);
        self
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self = self.with_store();
        self.seed_project = Some(project_id.to_owned());
        self
    }

    pub async fn build(self) -> ManagerCtx {
        if let (Some(store), Some(project_id)) = (&self.store, &self.seed_project) {
            store
                .upsert_project(&crate::store::ProjectRecord {
                    id: project_id.clone(),
                    name: "test".to_owned(),
                    path: "/tmp".to_owned(),
                    created_at: 0,
                })
                .await
                .unwrap();
        }

        let (events_tx, events_rx) = mpsc::channel(256);
        let host = MockShellHost::new(events_tx.clone());
        let remote = Arc::new(RemoteShellPool::new(events_tx));
        let buffers = Arc::new(BufferEngine::new(self.max_lines, self.store.clone()));
        let detector = Arc::new(StatusDetector::new(DetectorConfig::default()).unwrap());
        let captured = Arc::new(CapturedEvents::default());

        let manager = SessionManager::new(
            host.clone(),
            remote,
            Arc::clone(&buffers),
            Arc::clone(&detector),
            self.store.clone(),
            captured.sinks(),
        );
        manager.spawn_router(events_rx);

        ManagerCtx { manager, host, buffers, detector, store: self.store, captured }
    }
}

/// A gateway + manager stack over the mock host, for WebSocket tests.
pub struct GatewayCtx {
    pub gateway: Arc<crate::gateway::Gateway>,
    pub manager: Arc<SessionManager>,
    pub host: Arc<MockShellHost>,
    pub buffers: Arc<BufferEngine>,
}

/// Wire a gateway-fronted stack. Session output fans out through the real
/// gateway sinks instead of capture buffers.
pub async fn gateway_stack() -> GatewayCtx {
    let (events_tx, events_rx) = mpsc::channel(256);
    let host = MockShellHost::new(events_tx.clone());
    let remote = Arc::new(RemoteShellPool::new(events_tx));
    let buffers = Arc::new(BufferEngine::new(500, None));
    let detector = Arc::new(StatusDetector::new(DetectorConfig::default()).unwrap());

    let gateway = crate::gateway::Gateway::new(
        Arc::clone(&buffers),
        Arc::clone(&detector),
        None,
        None,
        None,
    );
    let manager = SessionManager::new(
        host.clone(),
        remote,
        Arc::clone(&buffers),
        detector,
        None,
        gateway.sinks(),
    );
    gateway.set_manager(Arc::clone(&manager));
    manager.spawn_router(events_rx);

    GatewayCtx { gateway, manager, host, buffers }
}

/// Serve the gateway router on an ephemeral port.
pub async fn spawn_ws_server(
    gateway: &Arc<crate::gateway::Gateway>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = gateway.build_router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Default spawn spec used across tests.
pub fn spawn_spec() -> ShellSpawnSpec {
    ShellSpawnSpec {
        shell: "bash".to_owned(),
        cwd: None,
        env: HashMap::new(),
        cols: 80,
        rows: 24,
    }
}

/// Wait until the router has drained pending host events.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

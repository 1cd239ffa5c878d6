// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Authoritative session table: creation, termination, recovery, and the
//! output path from shell hosts into buffers, the detector, and the gateway.
//!
//! The manager is the only mutator of the table. Output events arrive on a
//! single channel fed by per-shell reader tasks; processing is sequential,
//! which, together with the per-session buffer locks, gives the required
//! per-session ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{BufferEngine, BufferSnapshot};
use crate::error::{ErrorCode, GatewayError};
use crate::events::{
    now_ms, LifecycleEvent, OutputEvent, SessionSinks, TerminationEvent,
};
use crate::host::{HostEvent, ShellHost, ShellSpawnSpec};
use crate::id::{self, IdKind};
use crate::remote::{ConnectOutcome, InteractivePrompt, RemoteShellPool, SshAuth, SshDescriptor};
use crate::status::{ActivityStatus, StatusDetector};
use crate::store::{SessionRecord, Store};

use super::{Session, SessionKind, SessionStatus, ShellDescriptor};

/// Per-session activity entry included in reconnect responses.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub session_id: String,
    pub status: ActivityStatus,
}

/// Result of a bulk reconnect.
#[derive(Debug, Clone)]
pub struct ReconnectResult {
    pub active_sessions: Vec<Session>,
    pub terminated_sessions: Vec<String>,
    pub status_changes: Vec<StatusEntry>,
    pub buffers: Vec<BufferSnapshot>,
}

/// Table statistics for the stats event and cleanup reporting.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub total: usize,
    pub active: usize,
    pub disconnected: usize,
    pub terminated: usize,
    pub orphan_shells: usize,
}

struct Inner {
    sessions: HashMap<String, Session>,
    by_project: HashMap<String, HashSet<String>>,
    by_client: HashMap<String, HashSet<String>>,
    /// Host shells with no persisted session record, found at startup.
    orphans: Vec<String>,
}

pub struct SessionManager {
    inner: RwLock<Inner>,
    host: Arc<dyn ShellHost>,
    remote: Arc<RemoteShellPool>,
    buffers: Arc<BufferEngine>,
    detector: Arc<StatusDetector>,
    store: Option<Arc<Store>>,
    sinks: SessionSinks,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        host: Arc<dyn ShellHost>,
        remote: Arc<RemoteShellPool>,
        buffers: Arc<BufferEngine>,
        detector: Arc<StatusDetector>,
        store: Option<Arc<Store>>,
        sinks: SessionSinks,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                by_project: HashMap::new(),
                by_client: HashMap::new(),
                orphans: Vec::new(),
            }),
            host,
            remote,
            buffers,
            detector,
            store,
            sinks,
            shutdown: CancellationToken::new(),
        })
    }

    /// Consume host events until shutdown. One router serves all sessions;
    /// per-shell reader tasks stay independent upstream of the channel.
    pub fn spawn_router(self: &Arc<Self>, mut events_rx: mpsc::Receiver<HostEvent>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    event = events_rx.recv() => {
                        match event {
                            Some(HostEvent::Output { name, data }) => {
                                manager.on_output(&name, &data).await;
                            }
                            Some(HostEvent::Exited { name, exit_code }) => {
                                manager.on_exit(&name, exit_code).await;
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("session router stopped");
        });
    }

    /// Recover sessions from the host after a restart.
    ///
    /// Host shells with a persisted record are rehydrated in `disconnected`
    /// state; shells without one are reported as orphans. Persisted records
    /// whose shell is gone (including all remote sessions) are closed out as
    /// terminated.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let shells = self.host.list().await?;
        let shell_names: HashSet<String> = shells.iter().map(|s| s.name.clone()).collect();

        let records = match self.store {
            Some(ref store) => store.load_sessions().await?,
            None => Vec::new(),
        };

        let mut recovered = 0usize;
        for record in &records {
            let Some(status) = SessionStatus::parse(&record.status) else {
                continue;
            };
            if status == SessionStatus::Terminated {
                continue;
            }

            if record.kind == SessionKind::LocalTerminal.as_str()
                && shell_names.contains(&record.id)
            {
                let Ok(descriptor) = serde_json::from_str::<ShellDescriptor>(&record.descriptor)
                else {
                    warn!(session = %record.id, "unreadable descriptor, skipping recovery");
                    continue;
                };
                let session = Session {
                    id: record.id.clone(),
                    kind: SessionKind::LocalTerminal,
                    project_id: record.project_id.clone(),
                    status: SessionStatus::Disconnected,
                    activity_status: ActivityStatus::Idle,
                    descriptor,
                    owner: None,
                    created_at: record.created_at,
                    updated_at: now_ms(),
                    last_active_at: record.last_active_at,
                    exit_code: None,
                    metadata: serde_json::from_str(&record.metadata)
                        .unwrap_or_else(|_| serde_json::json!({})),
                };

                self.buffers.create(&session.id).await;
                if let Err(error) = self.buffers.load_buffer(&session.id).await {
                    warn!(session = %session.id, %error, "buffer rehydration failed");
                }
                if let Err(error) = self.host.attach(&session.id).await {
                    warn!(session = %session.id, %error, "re-attach failed, closing out");
                    self.persist_closed(record).await;
                    continue;
                }

                self.persist(&session).await;
                let mut inner = self.inner.write().await;
                inner
                    .by_project
                    .entry(session.project_id.clone())
                    .or_default()
                    .insert(session.id.clone());
                inner.sessions.insert(session.id.clone(), session);
                recovered += 1;
            } else {
                // Shell gone, or a remote session that cannot be re-attached.
                self.persist_closed(record).await;
            }
        }

        let record_ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let orphans: Vec<String> = shells
            .iter()
            .filter(|s| !record_ids.contains(s.name.as_str()))
            .map(|s| s.name.clone())
            .collect();
        if !orphans.is_empty() {
            info!(count = orphans.len(), "found orphan shells");
        }
        self.inner.write().await.orphans = orphans;

        info!(recovered, "session recovery complete");
        Ok(())
    }

    async fn persist_closed(&self, record: &SessionRecord) {
        if let Some(ref store) = self.store {
            let mut closed = record.clone();
            closed.status = SessionStatus::Terminated.as_str().to_owned();
            closed.updated_at = now_ms();
            if let Err(error) = store.upsert_session(&closed).await {
                warn!(session = %record.id, %error, "failed to close out session record");
            }
        }
    }

    // -- creation -----------------------------------------------------------

    pub async fn create_terminal_session(
        &self,
        client_id: &str,
        project_id: &str,
        spec: ShellSpawnSpec,
    ) -> Result<Session, GatewayError> {
        self.require_project(project_id).await?;

        let session_id = id::generate(IdKind::Session);
        let session = self
            .insert_session(
                &session_id,
                client_id,
                project_id,
                SessionKind::LocalTerminal,
                ShellDescriptor::LocalTerminal(spec.clone()),
            )
            .await;

        if let Err(error) = self.host.spawn(&session_id, &spec).await {
            warn!(session = %session_id, %error, "shell spawn failed");
            self.remove_session(&session_id).await;
            return Err(GatewayError::new(ErrorCode::PtySpawnFailed, error.to_string()));
        }

        self.buffers.create(&session_id).await;
        self.detector.set_session_shell(&session_id, &spec.shell);
        self.activate(&session_id).await;
        Ok(self.get_session(&session_id).await.unwrap_or(session))
    }

    pub async fn create_remote_session(
        &self,
        client_id: &str,
        project_id: &str,
        desc: SshDescriptor,
        auth: SshAuth,
        interactive: Option<mpsc::Sender<InteractivePrompt>>,
    ) -> Result<(Session, ConnectOutcome), GatewayError> {
        self.require_project(project_id).await?;

        let session_id = id::generate(IdKind::Session);
        let session = self
            .insert_session(
                &session_id,
                client_id,
                project_id,
                SessionKind::RemoteShell,
                ShellDescriptor::RemoteShell(desc.clone()),
            )
            .await;

        let outcome = match self.remote.connect(&session_id, &desc, auth, interactive).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.remove_session(&session_id).await;
                return Err(error);
            }
        };

        self.buffers.create(&session_id).await;
        self.detector.set_session_shell(&session_id, "ssh");
        self.activate(&session_id).await;
        Ok((self.get_session(&session_id).await.unwrap_or(session), outcome))
    }

    async fn require_project(&self, project_id: &str) -> Result<(), GatewayError> {
        if let Some(ref store) = self.store {
            let known = store
                .get_project(project_id)
                .await
                .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
            if known.is_none() {
                return Err(ErrorCode::ProjectNotFound.into());
            }
        }
        Ok(())
    }

    async fn insert_session(
        &self,
        session_id: &str,
        client_id: &str,
        project_id: &str,
        kind: SessionKind,
        descriptor: ShellDescriptor,
    ) -> Session {
        let now = now_ms();
        let session = Session {
            id: session_id.to_owned(),
            kind,
            project_id: project_id.to_owned(),
            status: SessionStatus::Creating,
            activity_status: ActivityStatus::Idle,
            descriptor,
            owner: Some(client_id.to_owned()),
            created_at: now,
            updated_at: now,
            last_active_at: now,
            exit_code: None,
            metadata: serde_json::json!({}),
        };

        {
            let mut inner = self.inner.write().await;
            inner
                .by_project
                .entry(project_id.to_owned())
                .or_default()
                .insert(session_id.to_owned());
            inner
                .by_client
                .entry(client_id.to_owned())
                .or_default()
                .insert(session_id.to_owned());
            inner.sessions.insert(session_id.to_owned(), session.clone());
        }
        self.persist(&session).await;
        session
    }

    async fn remove_session(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.remove(session_id) {
            if let Some(ids) = inner.by_project.get_mut(&session.project_id) {
                ids.remove(session_id);
            }
            if let Some(owner) = session.owner {
                if let Some(ids) = inner.by_client.get_mut(&owner) {
                    ids.remove(session_id);
                }
            }
        }
        drop(inner);
        if let Some(ref store) = self.store {
            let _ = store.delete_session(session_id).await;
        }
    }

    async fn activate(&self, session_id: &str) {
        if let Some(event) = self.transition(session_id, SessionStatus::Active).await {
            (self.sinks.on_lifecycle)(event);
        }
    }

    /// Apply a lifecycle transition if the state machine admits it.
    /// Returns the event to broadcast.
    async fn transition(
        &self,
        session_id: &str,
        to: SessionStatus,
    ) -> Option<LifecycleEvent> {
        let event = {
            let mut inner = self.inner.write().await;
            let session = inner.sessions.get_mut(session_id)?;
            if !session.status.can_transition(to) {
                return None;
            }
            let previous = session.status;
            session.status = to;
            session.updated_at = now_ms();
            LifecycleEvent {
                session_id: session_id.to_owned(),
                previous: previous.as_str().to_owned(),
                next: to.as_str().to_owned(),
                timestamp: now_ms(),
            }
        };
        if let Some(session) = self.get_session(session_id).await {
            self.persist(&session).await;
        }
        Some(event)
    }

    // -- I/O ----------------------------------------------------------------

    pub async fn write(&self, session_id: &str, data: &[u8]) -> Result<(), GatewayError> {
        let kind = {
            let mut inner = self.inner.write().await;
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| GatewayError::from(ErrorCode::SessionNotFound))?;
            if matches!(session.status, SessionStatus::Terminated | SessionStatus::Terminating) {
                return Err(ErrorCode::SessionTerminated.into());
            }
            session.last_active_at = now_ms();
            session.kind
        };

        let result = match kind {
            SessionKind::RemoteShell => self.remote.write(session_id, data).await,
            _ => self.host.write(session_id, data).await,
        };

        if let Err(error) = result {
            warn!(session = %session_id, %error, "shell write failed, degrading session");
            if let Some(event) = self.transition(session_id, SessionStatus::Error).await {
                (self.sinks.on_lifecycle)(event);
            }
            return Err(GatewayError::new(ErrorCode::PtyWriteFailed, error.to_string()));
        }
        Ok(())
    }

    pub async fn resize(
        &self,
        session_id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(), GatewayError> {
        let kind = {
            let mut inner = self.inner.write().await;
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| GatewayError::from(ErrorCode::SessionNotFound))?;
            if matches!(session.status, SessionStatus::Terminated | SessionStatus::Terminating) {
                return Err(ErrorCode::SessionTerminated.into());
            }
            session.descriptor.set_dimensions(cols, rows);
            session.last_active_at = now_ms();
            session.kind
        };

        let result = match kind {
            SessionKind::RemoteShell => self.remote.resize(session_id, cols, rows).await,
            _ => self.host.resize(session_id, cols, rows).await,
        };
        result.map_err(|e| GatewayError::new(ErrorCode::PtyWriteFailed, e.to_string()))
    }

    // -- output path --------------------------------------------------------

    async fn on_output(&self, session_id: &str, data: &[u8]) {
        {
            let mut inner = self.inner.write().await;
            let Some(session) = inner.sessions.get_mut(session_id) else {
                debug!(session = %session_id, "output for unknown session");
                return;
            };
            session.last_active_at = now_ms();
        }

        self.buffers.append(session_id, data).await;

        let status_change = self.detector.detect(session_id, data);
        if let Some(ref event) = status_change {
            let mut inner = self.inner.write().await;
            if let Some(session) = inner.sessions.get_mut(session_id) {
                session.activity_status = event.next;
            }
        }

        (self.sinks.on_output)(OutputEvent {
            session_id: session_id.to_owned(),
            data: bytes::Bytes::copy_from_slice(data),
        });
        if let Some(event) = status_change {
            (self.sinks.on_status_change)(event);
        }
    }

    async fn on_exit(&self, session_id: &str, exit_code: Option<i32>) {
        {
            let mut inner = self.inner.write().await;
            let Some(session) = inner.sessions.get_mut(session_id) else {
                return;
            };
            // A deliberate terminate is already driving the state machine.
            if matches!(session.status, SessionStatus::Terminated | SessionStatus::Terminating) {
                session.exit_code = session.exit_code.or(exit_code);
                return;
            }
            session.exit_code = exit_code;
        }
        self.finish_termination(session_id, exit_code).await;
    }

    // -- termination --------------------------------------------------------

    pub async fn terminate_session(&self, session_id: &str) -> Result<(), GatewayError> {
        let (kind, already_terminated) = {
            let inner = self.inner.read().await;
            let session = inner
                .sessions
                .get(session_id)
                .ok_or_else(|| GatewayError::from(ErrorCode::SessionNotFound))?;
            (session.kind, session.status == SessionStatus::Terminated)
        };
        if already_terminated {
            return Ok(());
        }

        if let Some(event) = self.transition(session_id, SessionStatus::Terminating).await {
            (self.sinks.on_lifecycle)(event);
        }

        let kill = match kind {
            SessionKind::RemoteShell => self.remote.kill(session_id).await,
            _ => self.host.kill(session_id).await,
        };
        if let Err(error) = kill {
            warn!(session = %session_id, %error, "shell kill failed");
        }

        let exit_code = self.get_session(session_id).await.and_then(|s| s.exit_code);
        self.finish_termination(session_id, exit_code).await;
        Ok(())
    }

    async fn finish_termination(&self, session_id: &str, exit_code: Option<i32>) {
        self.buffers.flush_session(session_id).await;

        if let Some(event) = self.transition(session_id, SessionStatus::Terminated).await {
            (self.sinks.on_lifecycle)(event);
        }
        self.detector.clear_session(session_id);

        (self.sinks.on_termination)(TerminationEvent {
            session_id: session_id.to_owned(),
            exit_code,
            timestamp: now_ms(),
        });
    }

    /// Best-effort parallel termination of every session in a project.
    pub async fn terminate_project_sessions(&self, project_id: &str) {
        let ids: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .by_project
                .get(project_id)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default()
        };
        let results = futures_util::future::join_all(
            ids.iter().map(|id| self.terminate_session(id)),
        )
        .await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(error) = result {
                warn!(session = %id, %error, "project termination skipped a session");
            }
        }
    }

    /// Drop a terminated session's record and buffer entirely.
    pub async fn collect_session(&self, session_id: &str) {
        self.buffers.delete_buffer(session_id).await;
        self.remove_session(session_id).await;
    }

    // -- client lifecycle ---------------------------------------------------

    /// The owning client's channel went away: mark buffers, flip sessions to
    /// `disconnected`, keep shells alive.
    pub async fn handle_client_disconnect(&self, client_id: &str) {
        let ids: Vec<String> = {
            let mut inner = self.inner.write().await;
            let ids: Vec<String> = inner
                .by_client
                .remove(client_id)
                .map(|ids| ids.into_iter().collect())
                .unwrap_or_default();
            for id in &ids {
                if let Some(session) = inner.sessions.get_mut(id) {
                    session.owner = None;
                }
            }
            ids
        };

        for id in &ids {
            self.buffers.mark_disconnect(id).await;
            if let Some(event) = self.transition(id, SessionStatus::Disconnected).await {
                (self.sinks.on_lifecycle)(event);
            }
        }
        if !ids.is_empty() {
            debug!(client = %client_id, sessions = ids.len(), "client disconnected");
        }
    }

    /// Re-bind the requested sessions to a new owning client and collect
    /// their reconnect payloads.
    pub async fn handle_client_reconnect(
        &self,
        client_id: &str,
        session_ids: &[String],
    ) -> ReconnectResult {
        let mut result = ReconnectResult {
            active_sessions: Vec::new(),
            terminated_sessions: Vec::new(),
            status_changes: Vec::new(),
            buffers: Vec::new(),
        };

        for session_id in session_ids {
            let (rebound, was_disconnected) = {
                let mut inner = self.inner.write().await;
                let status = inner.sessions.get(session_id).map(|s| s.status);
                match status {
                    None | Some(SessionStatus::Terminated) => (false, false),
                    Some(status) => {
                        // Exclusive hand-off: the previous owner loses the
                        // session atomically with this table update.
                        let old_owner = inner
                            .sessions
                            .get(session_id)
                            .and_then(|s| s.owner.clone());
                        if let Some(old) = old_owner {
                            if let Some(ids) = inner.by_client.get_mut(&old) {
                                ids.remove(session_id);
                            }
                        }
                        if let Some(session) = inner.sessions.get_mut(session_id) {
                            session.owner = Some(client_id.to_owned());
                        }
                        inner
                            .by_client
                            .entry(client_id.to_owned())
                            .or_default()
                            .insert(session_id.clone());
                        (true, status == SessionStatus::Disconnected)
                    }
                }
            };

            if !rebound {
                result.terminated_sessions.push(session_id.clone());
                continue;
            }

            // disconnected -> reconnecting -> active; a live hand-off skips
            // the intermediate state.
            if was_disconnected {
                if let Some(event) =
                    self.transition(session_id, SessionStatus::Reconnecting).await
                {
                    (self.sinks.on_lifecycle)(event);
                }
            }
            if let Some(event) = self.transition(session_id, SessionStatus::Active).await {
                (self.sinks.on_lifecycle)(event);
            }
            if let Some(snapshot) = self.buffers.get_snapshot(session_id).await {
                result.buffers.push(snapshot);
            }
            result.status_changes.push(StatusEntry {
                session_id: session_id.clone(),
                status: self.detector.get_status(session_id),
            });
            if let Some(session) = self.get_session(session_id).await {
                result.active_sessions.push(session);
            }
        }

        result
    }

    // -- queries ------------------------------------------------------------

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.inner.read().await.sessions.get(session_id).cloned()
    }

    /// The client currently entitled to a session's output.
    pub async fn owner_of(&self, session_id: &str) -> Option<String> {
        self.inner.read().await.sessions.get(session_id).and_then(|s| s.owner.clone())
    }

    pub async fn list_sessions(&self, project_id: Option<&str>) -> Vec<Session> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|s| project_id.is_none_or(|p| s.project_id == p))
            .cloned()
            .collect()
    }

    pub async fn orphans(&self) -> Vec<String> {
        self.inner.read().await.orphans.clone()
    }

    /// Kill an orphan shell reported by `initialize`.
    pub async fn kill_orphan(&self, name: &str) -> anyhow::Result<()> {
        self.host.kill(name).await?;
        let mut inner = self.inner.write().await;
        inner.orphans.retain(|n| n != name);
        Ok(())
    }

    pub async fn stats(&self) -> ManagerStats {
        let inner = self.inner.read().await;
        let mut stats = ManagerStats {
            total: inner.sessions.len(),
            orphan_shells: inner.orphans.len(),
            ..ManagerStats::default()
        };
        for session in inner.sessions.values() {
            match session.status {
                SessionStatus::Active => stats.active += 1,
                SessionStatus::Disconnected => stats.disconnected += 1,
                SessionStatus::Terminated => stats.terminated += 1,
                _ => {}
            }
        }
        stats
    }

    async fn persist(&self, session: &Session) {
        let Some(ref store) = self.store else {
            return;
        };
        let record = SessionRecord {
            id: session.id.clone(),
            kind: session.kind.as_str().to_owned(),
            project_id: session.project_id.clone(),
            status: session.status.as_str().to_owned(),
            descriptor: serde_json::to_string(&session.descriptor)
                .unwrap_or_else(|_| "{}".to_owned()),
            created_at: session.created_at,
            updated_at: session.updated_at,
            last_active_at: session.last_active_at,
            exit_code: session.exit_code,
            metadata: session.metadata.to_string(),
        };
        if let Err(error) = store.upsert_session(&record).await {
            warn!(session = %session.id, %error, "session persistence failed");
        }
    }

    /// Stop the router task. Host shells stay alive. Idempotent.
    pub fn destroy(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

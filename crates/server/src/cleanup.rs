// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Periodic expiry: idle shells, the live-shell cap, paused-session
//! timeouts, and garbage collection of terminated session records.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::now_ms;
use crate::host::ShellHost;
use crate::session::{SessionManager, SessionStatus};

/// Thresholds, all in milliseconds except the cap.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub idle_timeout_ms: u64,
    pub max_sessions: usize,
    pub check_interval_ms: u64,
    /// Interval of the paused-session sweep (a faster cadence than the
    /// shell sweep).
    pub paused_check_interval_ms: u64,
    pub paused_timeout_ms: u64,
}

/// Counters exposed through the stats event.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub last_run_at: Option<u64>,
    pub shells_examined: usize,
    pub orphans_found: usize,
    pub orphans_cleaned: u64,
    pub idle_terminated: u64,
    pub cap_terminated: u64,
    pub paused_terminated: u64,
    pub records_collected: u64,
}

pub struct CleanupService {
    manager: Arc<SessionManager>,
    host: Arc<dyn ShellHost>,
    config: CleanupConfig,
    stats: RwLock<CleanupStats>,
    shutdown: CancellationToken,
}

impl CleanupService {
    pub fn new(
        manager: Arc<SessionManager>,
        host: Arc<dyn ShellHost>,
        config: CleanupConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            host,
            config,
            stats: RwLock::new(CleanupStats::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn stats(&self) -> CleanupStats {
        self.stats.read().clone()
    }

    /// Kill every orphan shell reported at startup. Invoked by the
    /// client-facing cleanup request, never automatically.
    pub async fn clean_orphans(&self) -> u64 {
        let mut cleaned = 0u64;
        for name in self.manager.orphans().await {
            match self.manager.kill_orphan(&name).await {
                Ok(()) => cleaned += 1,
                Err(error) => warn!(shell = %name, %error, "orphan kill failed"),
            }
        }
        self.stats.write().orphans_cleaned += cleaned;
        cleaned
    }

    /// Run one sweep. Public so tests drive ticks directly.
    pub async fn tick(&self) {
        let now = now_ms();

        // 1. Orphan accounting: host shells with no session record.
        let shells = match self.host.list().await {
            Ok(shells) => shells,
            Err(error) => {
                warn!(%error, "cleanup could not enumerate shells");
                Vec::new()
            }
        };
        let sessions = self.manager.list_sessions(None).await;
        let known: std::collections::HashSet<&str> =
            sessions.iter().map(|s| s.id.as_str()).collect();
        let orphans_found = shells.iter().filter(|s| !known.contains(s.name.as_str())).count();

        let mut idle_terminated = 0u64;

        // 2. Idle expiry.
        for session in &sessions {
            let live = !matches!(
                session.status,
                SessionStatus::Terminated | SessionStatus::Terminating
            );
            if live && now.saturating_sub(session.last_active_at) > self.config.idle_timeout_ms {
                debug!(session = %session.id, "terminating idle session");
                if self.manager.terminate_session(&session.id).await.is_ok() {
                    idle_terminated += 1;
                }
            }
        }

        // 3. Enforce the live-session cap, oldest-by-activity first.
        let mut live: Vec<_> = self
            .manager
            .list_sessions(None)
            .await
            .into_iter()
            .filter(|s| {
                !matches!(s.status, SessionStatus::Terminated | SessionStatus::Terminating)
            })
            .collect();
        let mut cap_terminated = 0u64;
        if live.len() > self.config.max_sessions {
            live.sort_by_key(|s| s.last_active_at);
            let excess = live.len() - self.config.max_sessions;
            for session in live.iter().take(excess) {
                info!(session = %session.id, "terminating session over cap");
                if self.manager.terminate_session(&session.id).await.is_ok() {
                    cap_terminated += 1;
                }
            }
        }

        let mut stats = self.stats.write();
        stats.last_run_at = Some(now);
        stats.shells_examined = shells.len();
        stats.orphans_found = orphans_found;
        stats.idle_terminated += idle_terminated;
        stats.cap_terminated += cap_terminated;
    }

    /// Run one paused-session sweep: expire paused sessions and collect
    /// terminated records whose read grace period has passed.
    pub async fn paused_tick(&self) {
        let now = now_ms();
        let sessions = self.manager.list_sessions(None).await;

        let mut paused_terminated = 0u64;
        let mut records_collected = 0u64;

        for session in &sessions {
            if session.status == SessionStatus::Paused
                && now.saturating_sub(session.updated_at) > self.config.paused_timeout_ms
            {
                if self.manager.terminate_session(&session.id).await.is_ok() {
                    paused_terminated += 1;
                }
            }
        }

        for session in &sessions {
            if session.status == SessionStatus::Terminated
                && now.saturating_sub(session.updated_at) > self.config.paused_timeout_ms
            {
                self.manager.collect_session(&session.id).await;
                records_collected += 1;
            }
        }

        let mut stats = self.stats.write();
        stats.paused_terminated += paused_terminated;
        stats.records_collected += records_collected;
    }

    /// Spawn the periodic tasks: the shell sweep and the paused-session
    /// sweep, each on its own interval.
    pub fn spawn(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                service.config.check_interval_ms.max(1),
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => service.tick().await,
                }
            }
            debug!("cleanup task stopped");
        });

        let service = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                service.config.paused_check_interval_ms.max(1),
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => service.paused_tick().await,
                }
            }
            debug!("paused-session sweep stopped");
        });
    }

    /// Stop the periodic task. Idempotent.
    pub fn destroy(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;

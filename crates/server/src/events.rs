// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Internal events flowing from the session layer to the gateway.
//!
//! The session manager never knows about WebSockets; it is handed a set of
//! callbacks ([`SessionSinks`]) at construction and invokes them for output,
//! status transitions, and termination. The gateway owns the other end.

use std::sync::Arc;

use bytes::Bytes;

use crate::status::ActivityStatus;

/// Raw output produced by a session's backing shell.
#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub session_id: String,
    pub data: Bytes,
}

/// An activity-status transition detected on a session's output stream.
#[derive(Debug, Clone)]
pub struct StatusChangeEvent {
    pub session_id: String,
    pub previous: ActivityStatus,
    pub next: ActivityStatus,
    pub matched_pattern: Option<String>,
    pub timestamp: u64,
}

/// A session lifecycle-status transition.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub session_id: String,
    pub previous: String,
    pub next: String,
    pub timestamp: u64,
}

/// Terminal state of a session.
#[derive(Debug, Clone)]
pub struct TerminationEvent {
    pub session_id: String,
    pub exit_code: Option<i32>,
    pub timestamp: u64,
}

/// Callbacks handed to the session manager at construction.
///
/// Each sink is invoked from the session's reader task; implementations must
/// be cheap and non-blocking (the gateway forwards into per-client queues).
#[derive(Clone)]
pub struct SessionSinks {
    pub on_output: Arc<dyn Fn(OutputEvent) + Send + Sync>,
    pub on_status_change: Arc<dyn Fn(StatusChangeEvent) + Send + Sync>,
    pub on_lifecycle: Arc<dyn Fn(LifecycleEvent) + Send + Sync>,
    pub on_termination: Arc<dyn Fn(TerminationEvent) + Send + Sync>,
}

impl SessionSinks {
    /// Sinks that drop every event. Used in tests and before the gateway
    /// is wired up.
    pub fn discard() -> Self {
        Self {
            on_output: Arc::new(|_| {}),
            on_status_change: Arc::new(|_| {}),
            on_lifecycle: Arc::new(|_| {}),
            on_termination: Arc::new(|_| {}),
        }
    }
}

impl std::fmt::Debug for SessionSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSinks")
    }
}

/// Current UTC time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

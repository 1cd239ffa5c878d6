// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Browser-facing event gateway.
//!
//! One WebSocket per client. Inbound frames go through rate limiting,
//! payload validation, and a dispatch table; outbound messages are queued
//! per client so each channel preserves send order. Session output fans out
//! to the single owning client, never to anyone else.

pub mod handlers;
pub mod msg;
pub mod ratelimit;
pub mod ws;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::buffer::BufferEngine;
use crate::cleanup::CleanupService;
use crate::events::{
    LifecycleEvent, OutputEvent, SessionSinks, StatusChangeEvent, TerminationEvent,
};
use crate::session::SessionManager;
use crate::status::StatusDetector;
use crate::store::Store;
use crate::vault::CredentialVault;

use ratelimit::{Admission, RateBuckets};

/// Per-connection state.
pub struct ClientHandle {
    pub client_id: String,
    tx: mpsc::UnboundedSender<String>,
    buckets: parking_lot::Mutex<RateBuckets>,
    /// Sessions this client currently owns (mirror of the ownership map).
    subscribed: parking_lot::Mutex<HashSet<String>>,
    /// Continuation for an in-flight keyboard-interactive SSH handshake.
    pending_interactive: parking_lot::Mutex<Option<oneshot::Sender<Vec<String>>>>,
}

/// Which client owns a session's output, and which event family it speaks.
#[derive(Debug, Clone)]
struct OwnerEntry {
    client_id: String,
    remote: bool,
}

pub struct Gateway {
    clients: parking_lot::RwLock<HashMap<String, Arc<ClientHandle>>>,
    owners: parking_lot::RwLock<HashMap<String, OwnerEntry>>,
    manager: OnceLock<Arc<SessionManager>>,
    cleanup: OnceLock<Arc<CleanupService>>,
    pub(crate) buffers: Arc<BufferEngine>,
    pub(crate) detector: Arc<StatusDetector>,
    pub(crate) store: Option<Arc<Store>>,
    pub(crate) vault: Option<Arc<CredentialVault>>,
    cors_origin: Option<String>,
}

impl Gateway {
    pub fn new(
        buffers: Arc<BufferEngine>,
        detector: Arc<StatusDetector>,
        store: Option<Arc<Store>>,
        vault: Option<Arc<CredentialVault>>,
        cors_origin: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clients: parking_lot::RwLock::new(HashMap::new()),
            owners: parking_lot::RwLock::new(HashMap::new()),
            manager: OnceLock::new(),
            cleanup: OnceLock::new(),
            buffers,
            detector,
            store,
            vault,
            cors_origin,
        })
    }

    /// Wire the session manager in after construction (the manager's sinks
    /// need the gateway first).
    pub fn set_manager(&self, manager: Arc<SessionManager>) {
        let _ = self.manager.set(manager);
    }

    pub fn set_cleanup(&self, cleanup: Arc<CleanupService>) {
        let _ = self.cleanup.set(cleanup);
    }

    pub(crate) fn manager(&self) -> Option<&Arc<SessionManager>> {
        self.manager.get()
    }

    pub(crate) fn cleanup(&self) -> Option<&Arc<CleanupService>> {
        self.cleanup.get()
    }

    /// Callbacks handed to the session manager. All of them resolve the
    /// owning client synchronously and enqueue onto its ordered queue.
    pub fn sinks(self: &Arc<Self>) -> SessionSinks {
        let output_gw = Arc::clone(self);
        let status_gw = Arc::clone(self);
        let lifecycle_gw = Arc::clone(self);
        let termination_gw = Arc::clone(self);
        SessionSinks {
            on_output: Arc::new(move |e| output_gw.fanout_output(e)),
            on_status_change: Arc::new(move |e| status_gw.fanout_status_change(e)),
            on_lifecycle: Arc::new(move |e| lifecycle_gw.fanout_lifecycle(e)),
            on_termination: Arc::new(move |e| termination_gw.fanout_termination(e)),
        }
    }

    // -- client registry ----------------------------------------------------

    /// Register a client and return the receiving end of its outbound queue.
    pub fn register_client(&self, client_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(ClientHandle {
            client_id: client_id.to_owned(),
            tx,
            buckets: parking_lot::Mutex::new(RateBuckets::default()),
            subscribed: parking_lot::Mutex::new(HashSet::new()),
            pending_interactive: parking_lot::Mutex::new(None),
        });
        self.clients.write().insert(client_id.to_owned(), handle);
        debug!(client = client_id, "client registered");
        rx
    }

    /// Drop a client and its ownership entries. The session-side disconnect
    /// handling (buffer markers, status flips) is the caller's job.
    pub fn unregister_client(&self, client_id: &str) {
        self.clients.write().remove(client_id);
        self.owners.write().retain(|_, entry| entry.client_id != client_id);
        debug!(client = client_id, "client unregistered");
    }

    pub(crate) fn client(&self, client_id: &str) -> Option<Arc<ClientHandle>> {
        self.clients.read().get(client_id).cloned()
    }

    /// Route a session's events to `client_id` from now on.
    pub(crate) fn bind_session(&self, session_id: &str, client_id: &str, remote: bool) {
        let previous = self.owners.write().insert(
            session_id.to_owned(),
            OwnerEntry { client_id: client_id.to_owned(), remote },
        );
        if let Some(previous) = previous {
            if previous.client_id != client_id {
                if let Some(old) = self.client(&previous.client_id) {
                    old.subscribed.lock().remove(session_id);
                }
            }
        }
        if let Some(handle) = self.client(client_id) {
            handle.subscribed.lock().insert(session_id.to_owned());
        }
    }

    pub(crate) fn unbind_session(&self, session_id: &str) {
        if let Some(entry) = self.owners.write().remove(session_id) {
            if let Some(handle) = self.client(&entry.client_id) {
                handle.subscribed.lock().remove(session_id);
            }
        }
    }

    /// Enqueue a message for one client, preserving per-client order.
    pub(crate) fn send_value(&self, client_id: &str, value: serde_json::Value) {
        let Some(handle) = self.client(client_id) else {
            return;
        };
        match serde_json::to_string(&value) {
            Ok(text) => {
                let _ = handle.tx.send(text);
            }
            Err(error) => warn!(client = client_id, %error, "unserializable message"),
        }
    }

    pub(crate) fn admit(&self, client_id: &str, event: &str) -> Admission {
        match self.client(client_id) {
            Some(handle) => handle.buckets.lock().admit(event),
            None => Admission::Allowed,
        }
    }

    pub(crate) fn set_pending_interactive(
        &self,
        client_id: &str,
        reply: oneshot::Sender<Vec<String>>,
    ) {
        if let Some(handle) = self.client(client_id) {
            *handle.pending_interactive.lock() = Some(reply);
        }
    }

    pub(crate) fn take_pending_interactive(
        &self,
        client_id: &str,
    ) -> Option<oneshot::Sender<Vec<String>>> {
        self.client(client_id).and_then(|h| h.pending_interactive.lock().take())
    }

    // -- fanout -------------------------------------------------------------

    fn owner_of(&self, session_id: &str) -> Option<OwnerEntry> {
        self.owners.read().get(session_id).cloned()
    }

    fn fanout_output(&self, event: OutputEvent) {
        let Some(owner) = self.owner_of(&event.session_id) else {
            return;
        };
        let name = if owner.remote { "ssh:output" } else { "terminal:output" };
        let value = msg::outbound(
            name,
            None,
            json!({
                "sessionId": event.session_id,
                "data": String::from_utf8_lossy(&event.data),
            }),
        );
        self.send_value(&owner.client_id, value);
    }

    fn fanout_status_change(&self, event: StatusChangeEvent) {
        let Some(owner) = self.owner_of(&event.session_id) else {
            return;
        };
        let mut payload = json!({
            "sessionId": event.session_id,
            "previousStatus": event.previous,
            "newStatus": event.next,
        });
        if let Some(ref pattern) = event.matched_pattern {
            payload["matchedPattern"] = json!(pattern);
        }
        self.send_value(&owner.client_id, msg::outbound("status:change", None, payload));
    }

    fn fanout_lifecycle(&self, event: LifecycleEvent) {
        let Some(owner) = self.owner_of(&event.session_id) else {
            return;
        };
        let value = msg::outbound(
            "session:status-change",
            None,
            json!({
                "sessionId": event.session_id,
                "previousStatus": event.previous,
                "newStatus": event.next,
            }),
        );
        self.send_value(&owner.client_id, value);
    }

    fn fanout_termination(&self, event: TerminationEvent) {
        if let Some(owner) = self.owner_of(&event.session_id) {
            let value = msg::outbound(
                "session:terminated",
                None,
                json!({
                    "sessionId": event.session_id,
                    "exitCode": event.exit_code,
                }),
            );
            self.send_value(&owner.client_id, value);
        }
        self.unbind_session(&event.session_id);
    }

    // -- router -------------------------------------------------------------

    /// Build the axum router serving the event channel.
    pub fn build_router(self: &Arc<Self>) -> Router {
        let cors = match self.cors_origin.as_deref().map(HeaderValue::from_str) {
            Some(Ok(origin)) => CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
            Some(Err(_)) => {
                warn!("invalid CORS_ORIGIN value, allowing any origin");
                CorsLayer::permissive()
            }
            None => CorsLayer::permissive(),
        };

        Router::new()
            .route("/ws", get(ws::ws_handler))
            .layer(cors)
            .with_state(Arc::clone(self))
    }
}

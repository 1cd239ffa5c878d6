// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Event dispatch: one entry per event name, applied after rate limiting.
//!
//! Handlers never propagate errors to the connection loop; every failure
//! becomes an `error` (or `ssh:error`) reply carrying a stable code.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{ErrorCode, GatewayError};
use crate::events::now_ms;
use crate::host::ShellSpawnSpec;
use crate::id::{self, IdKind};
use crate::remote::{InteractivePrompt, SshAuth, SshDescriptor};
use crate::session::{SessionKind, SessionManager};
use crate::status::PatternSpec;
use crate::store::ProjectRecord;

use super::msg::{self, Envelope};
use super::ratelimit::Admission;
use super::Gateway;

/// Rate-limit, validate, and dispatch one inbound envelope.
///
/// The returned value, if any, is the direct reply; handlers that emit
/// multi-message responses enqueue them in order and return `None`.
pub async fn dispatch(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: Envelope,
) -> Option<Value> {
    let correlation_id = envelope.correlation_id.clone();

    match gateway.admit(client_id, &envelope.event) {
        Admission::Allowed => {}
        Admission::Rejected => {
            let error = GatewayError::from(ErrorCode::RateLimited);
            return Some(msg::error_reply(&error, correlation_id.as_deref()));
        }
        Admission::Dropped => return None,
    }

    let result = route(gateway, client_id, &envelope).await;
    match result {
        Ok(reply) => reply,
        Err(error) => {
            // SSH failures use their catalog event so clients can key on it.
            if envelope.event.starts_with("ssh:") {
                Some(msg::outbound(
                    "ssh:error",
                    correlation_id.as_deref(),
                    json!({ "code": error.code.as_str(), "message": error.message }),
                ))
            } else {
                Some(msg::error_reply(&error, correlation_id.as_deref()))
            }
        }
    }
}

async fn route(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let corr = envelope.correlation_id.as_deref();
    match envelope.event.as_str() {
        // Connection
        "ping" => Ok(Some(msg::outbound("pong", corr, json!({})))),
        "pong" => Ok(None),
        "disconnect" => Ok(None),

        // Session
        "session:create" => session_create(gateway, client_id, envelope).await,
        "session:terminate" => session_terminate(gateway, client_id, envelope).await,
        "session:list" => session_list(gateway, envelope).await,

        // Terminal
        "terminal:input" => terminal_input(gateway, client_id, envelope).await,
        "terminal:resize" => terminal_resize(gateway, client_id, envelope).await,
        "terminal:clear" => terminal_clear(gateway, client_id, envelope).await,
        "terminal:reconnect" => terminal_reconnect(gateway, client_id, envelope).await,
        "reconnect" => bulk_reconnect(gateway, client_id, envelope).await,

        // Status patterns
        "status:pattern:add" => pattern_add(gateway, envelope),
        "status:pattern:remove" => pattern_remove(gateway, envelope),
        "status:patterns:list" => Ok(Some(msg::outbound(
            "status:patterns:list",
            corr,
            json!({ "patterns": gateway.detector.get_patterns() }),
        ))),

        // Remote shells
        "ssh:connect" => ssh_connect(gateway, client_id, envelope).await,
        "ssh:input" => terminal_input(gateway, client_id, envelope).await,
        "ssh:resize" => terminal_resize(gateway, client_id, envelope).await,
        "ssh:close" => session_terminate(gateway, client_id, envelope).await,
        "ssh:keyboard-interactive-response" => {
            keyboard_interactive_response(gateway, client_id, envelope)
        }

        // Projects
        "project:create" => project_create(gateway, envelope).await,
        "project:list" => project_list(gateway, envelope).await,
        "project:delete" => project_delete(gateway, envelope).await,

        // Credentials
        "credential:store" => credential_store(gateway, envelope),
        "credential:list" => credential_list(gateway, envelope),
        "credential:delete" => credential_delete(gateway, envelope),

        // Stats and maintenance
        "stats:request" => stats(gateway, envelope).await,
        "session:cleanup" => session_cleanup(gateway, envelope).await,

        other => Err(GatewayError::new(
            ErrorCode::InvalidMessage,
            format!("unknown event: {other}"),
        )),
    }
}

fn manager(gateway: &Gateway) -> Result<&Arc<SessionManager>, GatewayError> {
    gateway
        .manager()
        .ok_or_else(|| GatewayError::new(ErrorCode::Internal, "session manager unavailable"))
}

/// Only the owning client may drive a session.
async fn require_owner(
    manager: &SessionManager,
    client_id: &str,
    session_id: &str,
) -> Result<(), GatewayError> {
    match manager.owner_of(session_id).await {
        Some(owner) if owner == client_id => Ok(()),
        _ => Err(ErrorCode::SessionNotFound.into()),
    }
}

// -- session ---------------------------------------------------------------

async fn session_create(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::SessionCreatePayload = envelope.payload()?;
    let manager = manager(gateway)?;

    let spec = ShellSpawnSpec {
        shell: payload.shell,
        cwd: payload.cwd,
        env: payload.env,
        cols: payload.cols,
        rows: payload.rows,
    };
    let session = manager
        .create_terminal_session(client_id, &payload.project_id, spec)
        .await?;
    gateway.bind_session(&session.id, client_id, false);

    Ok(Some(msg::outbound(
        "session:created",
        envelope.correlation_id.as_deref(),
        json!({ "session": session }),
    )))
}

async fn session_terminate(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::SessionIdPayload = envelope.payload()?;
    let manager = manager(gateway)?;
    require_owner(manager, client_id, &payload.session_id).await?;

    manager.terminate_session(&payload.session_id).await?;
    let exit_code = manager
        .get_session(&payload.session_id)
        .await
        .and_then(|s| s.exit_code);

    Ok(Some(msg::outbound(
        "session:terminated",
        envelope.correlation_id.as_deref(),
        json!({ "sessionId": payload.session_id, "exitCode": exit_code }),
    )))
}

async fn session_list(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::SessionListPayload = envelope.payload()?;
    let manager = manager(gateway)?;
    let sessions = manager.list_sessions(payload.project_id.as_deref()).await;
    Ok(Some(msg::outbound(
        "session:list:response",
        envelope.correlation_id.as_deref(),
        json!({ "sessions": sessions }),
    )))
}

// -- terminal --------------------------------------------------------------

async fn terminal_input(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::TerminalInputPayload = envelope.payload()?;
    let manager = manager(gateway)?;
    require_owner(manager, client_id, &payload.session_id).await?;
    if let Err(error) = manager.write(&payload.session_id, payload.data.as_bytes()).await {
        // A failed write degraded the session; tell the owner explicitly.
        if error.code == ErrorCode::PtyWriteFailed {
            gateway.send_value(
                client_id,
                msg::outbound(
                    "session:error",
                    None,
                    json!({
                        "sessionId": payload.session_id,
                        "code": error.code.as_str(),
                        "message": error.message,
                    }),
                ),
            );
        }
        return Err(error);
    }
    Ok(None)
}

async fn terminal_resize(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::TerminalResizePayload = envelope.payload()?;
    let manager = manager(gateway)?;
    require_owner(manager, client_id, &payload.session_id).await?;
    manager.resize(&payload.session_id, payload.cols, payload.rows).await?;
    Ok(None)
}

async fn terminal_clear(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::SessionIdPayload = envelope.payload()?;
    let manager = manager(gateway)?;
    require_owner(manager, client_id, &payload.session_id).await?;
    gateway.buffers.delete_buffer(&payload.session_id).await;
    gateway.buffers.create(&payload.session_id).await;
    Ok(None)
}

async fn terminal_reconnect(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::SessionIdPayload = envelope.payload()?;
    let manager = manager(gateway)?;
    let corr = envelope.correlation_id.as_deref();

    let result = manager
        .handle_client_reconnect(client_id, std::slice::from_ref(&payload.session_id))
        .await;

    if let Some(session) = result.active_sessions.first() {
        gateway.bind_session(
            &session.id,
            client_id,
            session.kind == SessionKind::RemoteShell,
        );
        let buffered = result
            .buffers
            .first()
            .map(|b| b.output_since_disconnect.clone())
            .unwrap_or_default();
        let status = result
            .status_changes
            .first()
            .map(|s| s.status)
            .unwrap_or_default();

        // Response first, replay second, on the same ordered queue.
        gateway.send_value(
            client_id,
            msg::outbound(
                "terminal:reconnect:response",
                corr,
                json!({
                    "sessionId": payload.session_id,
                    "success": true,
                    "bufferedOutput": buffered,
                    "currentStatus": status,
                }),
            ),
        );
        if !buffered.is_empty() {
            gateway.send_value(
                client_id,
                msg::outbound(
                    "terminal:buffer",
                    None,
                    json!({
                        "sessionId": payload.session_id,
                        "data": buffered,
                        "isReplay": true,
                    }),
                ),
            );
        }
        Ok(None)
    } else {
        Ok(Some(msg::outbound(
            "terminal:reconnect:response",
            corr,
            json!({
                "sessionId": payload.session_id,
                "success": false,
                "error": "session not found or terminated",
            }),
        )))
    }
}

async fn bulk_reconnect(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::ReconnectPayload = envelope.payload()?;
    let manager = manager(gateway)?;
    let corr = envelope.correlation_id.as_deref();

    let result = manager.handle_client_reconnect(client_id, &payload.session_ids).await;
    for session in &result.active_sessions {
        gateway.bind_session(
            &session.id,
            client_id,
            session.kind == SessionKind::RemoteShell,
        );
    }

    let buffers: Vec<Value> = result
        .buffers
        .iter()
        .map(|b| {
            json!({
                "sessionId": b.session_id,
                "outputSinceDisconnect": b.output_since_disconnect,
                "disconnectTime": b.disconnect_time,
                "reconnectTime": b.reconnect_time,
            })
        })
        .collect();

    // The response goes first on the channel; progressive replays follow.
    gateway.send_value(
        client_id,
        msg::outbound(
            "reconnect",
            corr,
            json!({
                "activeSessions": result.active_sessions,
                "terminatedSessions": result.terminated_sessions,
                "statusChanges": result.status_changes,
                "buffers": buffers,
            }),
        ),
    );

    for buffer in &result.buffers {
        if buffer.output_since_disconnect.is_empty() {
            continue;
        }
        gateway.send_value(
            client_id,
            msg::outbound(
                "terminal:buffer",
                None,
                json!({
                    "sessionId": buffer.session_id,
                    "data": buffer.output_since_disconnect,
                    "isReplay": true,
                }),
            ),
        );
    }

    Ok(None)
}

// -- status patterns -------------------------------------------------------

fn pattern_add(gateway: &Arc<Gateway>, envelope: &Envelope) -> Result<Option<Value>, GatewayError> {
    let payload: msg::PatternAddPayload = envelope.payload()?;
    let spec = PatternSpec {
        id: payload.id,
        name: payload.name,
        shell: payload.shell,
        pattern: payload.pattern,
        status: payload.status,
        priority: payload.priority,
        enabled: payload.enabled,
    };
    let pattern_id = spec.id.clone();
    gateway
        .detector
        .add_pattern(spec)
        .map_err(|e| GatewayError::new(ErrorCode::ValidationFailed, e.to_string()))?;
    Ok(Some(msg::outbound(
        "status:pattern:add",
        envelope.correlation_id.as_deref(),
        json!({ "patternId": pattern_id, "success": true }),
    )))
}

fn pattern_remove(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::PatternRemovePayload = envelope.payload()?;
    let removed = gateway.detector.remove_pattern(&payload.pattern_id);
    Ok(Some(msg::outbound(
        "status:pattern:remove",
        envelope.correlation_id.as_deref(),
        json!({ "patternId": payload.pattern_id, "removed": removed }),
    )))
}

// -- remote shells ---------------------------------------------------------

async fn ssh_connect(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::SshConnectPayload = envelope.payload()?;
    let manager = manager(gateway)?;

    let (desc, auth) = resolve_ssh_request(gateway, &payload)?;

    // Keyboard-interactive rounds are relayed to this client; the reply
    // arrives as `ssh:keyboard-interactive-response`.
    let interactive = if matches!(auth, SshAuth::KeyboardInteractive) {
        let (prompt_tx, mut prompt_rx) = mpsc::channel::<InteractivePrompt>(4);
        let relay_gateway = Arc::clone(gateway);
        let relay_client = client_id.to_owned();
        tokio::spawn(async move {
            while let Some(prompt) = prompt_rx.recv().await {
                relay_gateway.set_pending_interactive(&relay_client, prompt.reply);
                relay_gateway.send_value(
                    &relay_client,
                    msg::outbound(
                        "ssh:keyboard-interactive",
                        None,
                        json!({
                            "name": prompt.name,
                            "instructions": prompt.instructions,
                            "prompts": prompt
                                .prompts
                                .iter()
                                .map(|(text, echo)| json!({ "prompt": text, "echo": echo }))
                                .collect::<Vec<_>>(),
                        }),
                    ),
                );
            }
        });
        Some(prompt_tx)
    } else {
        None
    };

    let (session, outcome) = manager
        .create_remote_session(client_id, &payload.project_id, desc, auth, interactive)
        .await?;
    gateway.bind_session(&session.id, client_id, true);

    Ok(Some(msg::outbound(
        "ssh:connected",
        envelope.correlation_id.as_deref(),
        json!({
            "sessionId": session.id,
            "session": session,
            "hostKeyFingerprint": outcome.host_key_fingerprint,
        }),
    )))
}

/// Build descriptor and secrets from the request, pulling from the vault
/// when a credential id is given.
fn resolve_ssh_request(
    gateway: &Gateway,
    payload: &msg::SshConnectPayload,
) -> Result<(SshDescriptor, SshAuth), GatewayError> {
    if let Some(ref credential_id) = payload.credential_id {
        let vault = gateway.vault.as_ref().ok_or_else(|| {
            GatewayError::new(ErrorCode::SshAuthFailed, "credential vault not initialized")
        })?;
        let credential = vault.get(credential_id)?;
        let auth = match credential.auth_method.as_str() {
            "password" => SshAuth::Password(credential.password.clone().ok_or_else(|| {
                GatewayError::new(ErrorCode::SshAuthFailed, "credential has no password")
            })?),
            "private-key" => SshAuth::PrivateKey {
                pem: credential.private_key.clone().ok_or_else(|| {
                    GatewayError::new(ErrorCode::SshAuthFailed, "credential has no key")
                })?,
                passphrase: None,
            },
            other => {
                return Err(GatewayError::new(
                    ErrorCode::SshAuthFailed,
                    format!("unsupported credential auth method: {other}"),
                ))
            }
        };
        let desc = SshDescriptor {
            host: credential.host.clone(),
            port: credential.port,
            username: credential.username.clone(),
            auth_method: credential.auth_method.clone(),
            cols: payload.cols,
            rows: payload.rows,
        };
        return Ok((desc, auth));
    }

    let auth = match payload.auth_method.as_str() {
        "password" => SshAuth::Password(payload.password.clone().ok_or_else(|| {
            GatewayError::new(ErrorCode::ValidationFailed, "password is required")
        })?),
        "private-key" => SshAuth::PrivateKey {
            pem: payload.private_key.clone().ok_or_else(|| {
                GatewayError::new(ErrorCode::ValidationFailed, "privateKey is required")
            })?,
            passphrase: payload.passphrase.clone(),
        },
        "keyboard-interactive" => SshAuth::KeyboardInteractive,
        other => {
            return Err(GatewayError::new(
                ErrorCode::ValidationFailed,
                format!("unknown auth method: {other}"),
            ))
        }
    };
    let desc = SshDescriptor {
        host: payload.host.clone(),
        port: payload.port,
        username: payload.username.clone(),
        auth_method: payload.auth_method.clone(),
        cols: payload.cols,
        rows: payload.rows,
    };
    Ok((desc, auth))
}

fn keyboard_interactive_response(
    gateway: &Arc<Gateway>,
    client_id: &str,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::KeyboardInteractivePayload = envelope.payload()?;
    let reply = gateway.take_pending_interactive(client_id).ok_or_else(|| {
        GatewayError::new(ErrorCode::ValidationFailed, "no pending interactive prompt")
    })?;
    if reply.send(payload.answers).is_err() {
        warn!(client = client_id, "interactive handshake already finished");
    }
    Ok(None)
}

// -- projects --------------------------------------------------------------

async fn project_create(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::ProjectCreatePayload = envelope.payload()?;
    let store = gateway
        .store
        .as_ref()
        .ok_or_else(|| GatewayError::new(ErrorCode::Internal, "persistence disabled"))?;

    let record = ProjectRecord {
        id: id::generate(IdKind::Project),
        name: payload.name,
        path: payload.path,
        created_at: now_ms(),
    };
    store
        .upsert_project(&record)
        .await
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;

    Ok(Some(msg::outbound(
        "project:created",
        envelope.correlation_id.as_deref(),
        json!({
            "project": {
                "id": record.id,
                "name": record.name,
                "path": record.path,
                "createdAt": record.created_at,
            }
        }),
    )))
}

async fn project_list(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let store = gateway
        .store
        .as_ref()
        .ok_or_else(|| GatewayError::new(ErrorCode::Internal, "persistence disabled"))?;
    let projects: Vec<Value> = store
        .list_projects()
        .await
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "path": p.path,
                "createdAt": p.created_at,
            })
        })
        .collect();
    Ok(Some(msg::outbound(
        "project:list:response",
        envelope.correlation_id.as_deref(),
        json!({ "projects": projects }),
    )))
}

async fn project_delete(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::ProjectDeletePayload = envelope.payload()?;
    let manager = manager(gateway)?;
    let store = gateway
        .store
        .as_ref()
        .ok_or_else(|| GatewayError::new(ErrorCode::Internal, "persistence disabled"))?;

    let known = store
        .get_project(&payload.project_id)
        .await
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
    if known.is_none() {
        return Err(ErrorCode::ProjectNotFound.into());
    }

    // Deleting a project terminates all of its sessions first.
    manager.terminate_project_sessions(&payload.project_id).await;
    store
        .delete_project(&payload.project_id)
        .await
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;

    Ok(Some(msg::outbound(
        "project:deleted",
        envelope.correlation_id.as_deref(),
        json!({ "projectId": payload.project_id }),
    )))
}

// -- credentials -----------------------------------------------------------

fn vault(gateway: &Gateway) -> Result<&Arc<crate::vault::CredentialVault>, GatewayError> {
    gateway.vault.as_ref().ok_or_else(|| {
        GatewayError::new(ErrorCode::SshAuthFailed, "credential vault not initialized")
    })
}

fn credential_store(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::CredentialStorePayload = envelope.payload()?;
    let credential_id = vault(gateway)?.store(
        &payload.name,
        &payload.host,
        payload.port,
        &payload.username,
        &payload.auth_method,
        payload.password.as_deref(),
        payload.private_key.as_deref(),
    )?;
    Ok(Some(msg::outbound(
        "credential:store:response",
        envelope.correlation_id.as_deref(),
        json!({ "credentialId": credential_id }),
    )))
}

fn credential_list(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let credentials = vault(gateway)?.list();
    Ok(Some(msg::outbound(
        "credential:list:response",
        envelope.correlation_id.as_deref(),
        json!({ "credentials": credentials }),
    )))
}

fn credential_delete(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let payload: msg::CredentialDeletePayload = envelope.payload()?;
    let removed = vault(gateway)?.delete(&payload.credential_id)?;
    Ok(Some(msg::outbound(
        "credential:delete:response",
        envelope.correlation_id.as_deref(),
        json!({ "credentialId": payload.credential_id, "removed": removed }),
    )))
}

/// Kill orphan shells on demand.
async fn session_cleanup(
    gateway: &Arc<Gateway>,
    envelope: &Envelope,
) -> Result<Option<Value>, GatewayError> {
    let cleanup = gateway
        .cleanup()
        .ok_or_else(|| GatewayError::new(ErrorCode::Internal, "cleanup service unavailable"))?;
    let cleaned = cleanup.clean_orphans().await;
    Ok(Some(msg::outbound(
        "session:cleanup:response",
        envelope.correlation_id.as_deref(),
        json!({ "orphansCleaned": cleaned }),
    )))
}

// -- stats -----------------------------------------------------------------

async fn stats(gateway: &Arc<Gateway>, envelope: &Envelope) -> Result<Option<Value>, GatewayError> {
    let manager = manager(gateway)?;
    let sessions = manager.stats().await;
    let orphans = manager.orphans().await;
    let buffers = gateway.buffers.stats().await;
    let cleanup = gateway.cleanup().map(|c| c.stats());
    Ok(Some(msg::outbound(
        "stats:response",
        envelope.correlation_id.as_deref(),
        json!({
            "sessions": sessions,
            "buffers": buffers,
            "orphanShells": orphans,
            "cleanup": cleanup,
        }),
    )))
}

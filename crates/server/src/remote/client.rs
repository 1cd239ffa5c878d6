// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! russh client plumbing: connect, authenticate, open the PTY channel, and
//! pump bytes between the channel and the host event stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use russh::client::{AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorCode, GatewayError};
use crate::host::HostEvent;

use super::{connect_error, InteractivePrompt, RemoteInput, SshAuth, SshDescriptor};

/// A connected, authenticated shell channel with its pump task running.
pub struct Connection {
    pub input_tx: mpsc::Sender<RemoteInput>,
    pub host_key_fingerprint: Option<String>,
}

/// Accepts the server key on first contact and records its fingerprint.
/// Strict host-key checking is a deployment-boundary concern.
struct Handler {
    fingerprint: Arc<parking_lot::Mutex<Option<String>>>,
}

impl russh::client::Handler for Handler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fp = server_public_key.fingerprint(Default::default()).to_string();
        *self.fingerprint.lock() = Some(fp);
        Ok(true)
    }
}

/// Connect, authenticate, request a PTY + shell, and spawn the pump task.
#[allow(clippy::too_many_arguments)]
pub async fn establish(
    desc: &SshDescriptor,
    auth: SshAuth,
    interactive: Option<mpsc::Sender<InteractivePrompt>>,
    connect_timeout: Duration,
    events_tx: mpsc::Sender<HostEvent>,
    name: String,
    cancel: CancellationToken,
) -> Result<Connection, GatewayError> {
    let fingerprint = Arc::new(parking_lot::Mutex::new(None));
    let handler = Handler { fingerprint: Arc::clone(&fingerprint) };

    let config = Arc::new(russh::client::Config::default());
    let address = (desc.host.as_str(), desc.port);

    let mut handle =
        match tokio::time::timeout(connect_timeout, russh::client::connect(config, address, handler))
            .await
        {
            Err(_) => {
                return Err(connect_error(
                    format!("connecting to {}:{} timed out", desc.host, desc.port),
                    ErrorCode::SshTimeout,
                ))
            }
            Ok(Err(error)) => {
                return Err(connect_error(
                    format!("connecting to {}:{} failed: {error}", desc.host, desc.port),
                    ErrorCode::SshConnectionFailed,
                ))
            }
            Ok(Ok(handle)) => handle,
        };

    authenticate(&mut handle, desc, auth, interactive).await?;

    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| connect_error(format!("channel open failed: {e}"), ErrorCode::SshConnectionFailed))?;
    channel
        .request_pty(false, "xterm-256color", u32::from(desc.cols), u32::from(desc.rows), 0, 0, &[])
        .await
        .map_err(|e| connect_error(format!("pty request failed: {e}"), ErrorCode::SshConnectionFailed))?;
    channel
        .request_shell(false)
        .await
        .map_err(|e| connect_error(format!("shell request failed: {e}"), ErrorCode::SshConnectionFailed))?;

    let (input_tx, input_rx) = mpsc::channel(64);
    tokio::spawn(pump(channel, input_rx, events_tx, name, cancel));

    let host_key_fingerprint = fingerprint.lock().clone();
    Ok(Connection { input_tx, host_key_fingerprint })
}

async fn authenticate(
    handle: &mut russh::client::Handle<Handler>,
    desc: &SshDescriptor,
    auth: SshAuth,
    interactive: Option<mpsc::Sender<InteractivePrompt>>,
) -> Result<(), GatewayError> {
    match auth {
        SshAuth::Password(password) => {
            let result = handle
                .authenticate_password(desc.username.clone(), password)
                .await
                .map_err(|e| connect_error(format!("auth failed: {e}"), ErrorCode::SshAuthFailed))?;
            if !matches!(result, AuthResult::Success) {
                return Err(connect_error("password rejected", ErrorCode::SshAuthFailed));
            }
        }
        SshAuth::PrivateKey { pem, passphrase } => {
            let key = russh::keys::decode_secret_key(&pem, passphrase.as_deref())
                .map_err(|e| connect_error(format!("bad private key: {e}"), ErrorCode::SshAuthFailed))?;
            let hash = handle
                .best_supported_rsa_hash()
                .await
                .map_err(|e| connect_error(format!("auth failed: {e}"), ErrorCode::SshAuthFailed))?
                .flatten();
            let result = handle
                .authenticate_publickey(
                    desc.username.clone(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                )
                .await
                .map_err(|e| connect_error(format!("auth failed: {e}"), ErrorCode::SshAuthFailed))?;
            if !matches!(result, AuthResult::Success) {
                return Err(connect_error("key rejected", ErrorCode::SshAuthFailed));
            }
        }
        SshAuth::KeyboardInteractive => {
            let Some(prompt_tx) = interactive else {
                return Err(connect_error(
                    "keyboard-interactive auth needs an interactive client",
                    ErrorCode::SshAuthFailed,
                ));
            };
            let mut response = handle
                .authenticate_keyboard_interactive_start(desc.username.clone(), None)
                .await
                .map_err(|e| connect_error(format!("auth failed: {e}"), ErrorCode::SshAuthFailed))?;
            loop {
                match response {
                    KeyboardInteractiveAuthResponse::Success => break,
                    KeyboardInteractiveAuthResponse::Failure { .. } => {
                        return Err(connect_error(
                            "keyboard-interactive auth rejected",
                            ErrorCode::SshAuthFailed,
                        ));
                    }
                    KeyboardInteractiveAuthResponse::InfoRequest {
                        name, instructions, prompts, ..
                    } => {
                        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
                        let request = InteractivePrompt {
                            name,
                            instructions,
                            prompts: prompts.into_iter().map(|p| (p.prompt, p.echo)).collect(),
                            reply: reply_tx,
                        };
                        prompt_tx.send(request).await.map_err(|_| {
                            connect_error("interactive client went away", ErrorCode::SshAuthFailed)
                        })?;
                        let answers = reply_rx.await.map_err(|_| {
                            connect_error("interactive reply dropped", ErrorCode::SshAuthFailed)
                        })?;
                        response = handle
                            .authenticate_keyboard_interactive_respond(answers)
                            .await
                            .map_err(|e| {
                                connect_error(format!("auth failed: {e}"), ErrorCode::SshAuthFailed)
                            })?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Pump input to the channel and channel output to the host event stream.
async fn pump(
    mut channel: russh::Channel<russh::client::Msg>,
    mut input_rx: mpsc::Receiver<RemoteInput>,
    events_tx: mpsc::Sender<HostEvent>,
    name: String,
    cancel: CancellationToken,
) {
    let mut exit_code: Option<i32> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            input = input_rx.recv() => {
                match input {
                    Some(RemoteInput::Data(data)) => {
                        if let Err(error) = channel.data(&data[..]).await {
                            warn!(shell = %name, %error, "ssh write failed");
                            break;
                        }
                    }
                    Some(RemoteInput::Resize(cols, rows)) => {
                        if let Err(error) =
                            channel.window_change(u32::from(cols), u32::from(rows), 0, 0).await
                        {
                            warn!(shell = %name, %error, "ssh resize failed");
                        }
                    }
                    Some(RemoteInput::Close) | None => {
                        let _ = channel.eof().await;
                        break;
                    }
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(russh::ChannelMsg::Data { data }) => {
                        let bytes = Bytes::copy_from_slice(&data);
                        if events_tx
                            .send(HostEvent::Output { name: name.clone(), data: bytes })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(russh::ChannelMsg::ExtendedData { data, .. }) => {
                        let bytes = Bytes::copy_from_slice(&data);
                        if events_tx
                            .send(HostEvent::Output { name: name.clone(), data: bytes })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status as i32);
                    }
                    Some(russh::ChannelMsg::Eof) => {}
                    Some(russh::ChannelMsg::Close) | None => break,
                    Some(other) => {
                        debug!(shell = %name, ?other, "unhandled channel message");
                    }
                }
            }
        }
    }

    let _ = events_tx.send(HostEvent::Exited { name, exit_code }).await;
}

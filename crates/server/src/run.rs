// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Top-level wiring, shared by `main` and the binary smoke tests.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::buffer::BufferEngine;
use crate::cleanup::{CleanupConfig, CleanupService};
use crate::config::Config;
use crate::gateway::Gateway;
use crate::host::tmux::TmuxHost;
use crate::host::ShellHost;
use crate::remote::RemoteShellPool;
use crate::session::SessionManager;
use crate::status::{DetectorConfig, StatusDetector};
use crate::store::Store;
use crate::vault::CredentialVault;

/// A fully wired server, ready to serve.
pub struct App {
    pub gateway: Arc<Gateway>,
    pub manager: Arc<SessionManager>,
    pub buffers: Arc<BufferEngine>,
    pub cleanup: Arc<CleanupService>,
    pub host: Arc<dyn ShellHost>,
    pub shutdown: CancellationToken,
}

/// Install the tracing subscriber per config.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.tracing_level()));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Build every component and recover persisted sessions.
///
/// The only fatal failures here are opening the persistent store and
/// reaching tmux; everything later degrades and logs instead.
pub async fn prepare(config: &Config) -> anyhow::Result<App> {
    let store = Arc::new(Store::open(&config.db_path)?);

    let vault = match config.vault_key {
        Some(ref master) => {
            let vault = CredentialVault::new(config.vault_path.clone());
            vault.initialize(master)?;
            Some(Arc::new(vault))
        }
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel(1024);

    let pipe_dir = std::env::temp_dir().join("quay-pipes");
    let host: Arc<dyn ShellHost> =
        TmuxHost::new(config.tmux_socket.clone(), pipe_dir, events_tx.clone()).await?;
    let remote = Arc::new(RemoteShellPool::new(events_tx));

    let buffers = Arc::new(BufferEngine::new(config.scrollback_lines, Some(Arc::clone(&store))));
    buffers.spawn_flush_task(config.buffer_persist_interval_ms);

    let detector = Arc::new(StatusDetector::new(DetectorConfig::default())?);

    let gateway = Gateway::new(
        Arc::clone(&buffers),
        Arc::clone(&detector),
        Some(Arc::clone(&store)),
        vault,
        config.cors_origin.clone(),
    );

    let manager = SessionManager::new(
        Arc::clone(&host),
        remote,
        Arc::clone(&buffers),
        detector,
        Some(store),
        gateway.sinks(),
    );
    gateway.set_manager(Arc::clone(&manager));
    manager.spawn_router(events_rx);
    manager.initialize().await?;

    let cleanup = CleanupService::new(
        Arc::clone(&manager),
        Arc::clone(&host),
        CleanupConfig {
            idle_timeout_ms: config.shell_idle_timeout_ms,
            max_sessions: config.max_shells,
            check_interval_ms: config.shell_cleanup_interval_ms,
            paused_check_interval_ms: config.session_cleanup_interval_ms,
            paused_timeout_ms: config.paused_session_timeout_ms,
        },
    );
    cleanup.spawn();
    gateway.set_cleanup(Arc::clone(&cleanup));

    Ok(App {
        gateway,
        manager,
        buffers,
        cleanup,
        host,
        shutdown: CancellationToken::new(),
    })
}

/// Run the server until SIGINT or the shutdown token fires.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let app = prepare(&config).await?;
    let router = app.gateway.build_router();

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let shutdown = app.shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(error) = result {
                        warn!(%error, "signal handler failed");
                    }
                }
            }
        })
        .await?;

    info!("shutting down");
    app.cleanup.destroy();
    app.manager.destroy();
    // One last flush so recent output survives the restart.
    app.buffers.flush().await;
    app.buffers.destroy().await;
    app.host.destroy().await;
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use std::path::PathBuf;

use clap::Parser;

/// Persistent terminal-session server with a browser-facing event gateway.
#[derive(Debug, Clone, Parser)]
#[command(name = "quay", version, about)]
pub struct Config {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Allowed origin for the event channel handshake.
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Log level (fatal, error, warn, info, debug, trace).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Scrollback buffer cap per session, in lines.
    #[arg(long, env = "SCROLLBACK_LINES", default_value = "50000")]
    pub scrollback_lines: usize,

    /// Buffer persistence flush interval in milliseconds (0 = disabled).
    #[arg(long, env = "BUFFER_PERSIST_INTERVAL_MS", default_value = "5000")]
    pub buffer_persist_interval_ms: u64,

    /// Paused-session sweep interval in milliseconds.
    #[arg(long, env = "SESSION_CLEANUP_INTERVAL_MS", default_value = "60000")]
    pub session_cleanup_interval_ms: u64,

    /// How long a paused session may linger before expiry, in milliseconds.
    #[arg(long, env = "PAUSED_SESSION_TIMEOUT_MS", default_value = "3600000")]
    pub paused_session_timeout_ms: u64,

    /// Idle timeout before a host shell is expired, in milliseconds.
    #[arg(long, env = "TMUX_IDLE_TIMEOUT_MS", default_value = "172800000")]
    pub shell_idle_timeout_ms: u64,

    /// Maximum number of live host shells.
    #[arg(long, env = "TMUX_MAX_SESSIONS", default_value = "400")]
    pub max_shells: usize,

    /// Cleanup service tick interval in milliseconds.
    #[arg(long, env = "TMUX_CLEANUP_INTERVAL_MS", default_value = "300000")]
    pub shell_cleanup_interval_ms: u64,

    /// Path of the SQLite store file.
    #[arg(long, env = "QUAY_DB_PATH", default_value = "quay.db")]
    pub db_path: PathBuf,

    /// Path of the encrypted credential vault file.
    #[arg(long, env = "QUAY_VAULT_PATH", default_value = "quay-vault.json")]
    pub vault_path: PathBuf,

    /// Master password unlocking the credential vault. Unset disables it.
    #[arg(long, env = "QUAY_VAULT_KEY", hide_env_values = true)]
    pub vault_key: Option<String>,

    /// tmux server socket path. Unset means the user's default server.
    #[arg(long, env = "QUAY_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,
}

const LOG_LEVELS: &[&str] = &["fatal", "error", "warn", "info", "debug", "trace"];

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            anyhow::bail!("invalid log level: {}", self.log_level);
        }
        if self.log_format != "json" && self.log_format != "text" {
            anyhow::bail!("invalid log format: {}", self.log_format);
        }
        if self.scrollback_lines == 0 {
            anyhow::bail!("--scrollback-lines must be at least 1");
        }
        if self.max_shells == 0 {
            anyhow::bail!("--max-shells must be at least 1");
        }
        Ok(())
    }

    /// The `tracing` filter directive for the configured level.
    ///
    /// `fatal` has no tracing counterpart; it maps to `error`.
    pub fn tracing_level(&self) -> &'static str {
        match self.log_level.as_str() {
            "fatal" | "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

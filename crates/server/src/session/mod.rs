// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Session model and lifecycle state machine.
//!
//! A session is a logical handle to a long-running interactive program whose
//! lifetime is independent of any single client connection. The manager in
//! [`manager`] owns the authoritative table.

pub mod manager;

use serde::{Deserialize, Serialize};

use crate::host::ShellSpawnSpec;
use crate::remote::SshDescriptor;
use crate::status::ActivityStatus;

pub use manager::{ManagerStats, ReconnectResult, SessionManager};

/// Lifecycle status. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Active,
    Paused,
    Disconnected,
    Reconnecting,
    Terminating,
    Terminated,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(Self::Creating),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "disconnected" => Some(Self::Disconnected),
            "reconnecting" => Some(Self::Reconnecting),
            "terminating" => Some(Self::Terminating),
            "terminated" => Some(Self::Terminated),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether the state machine admits `self -> to`.
    pub fn can_transition(&self, to: SessionStatus) -> bool {
        if *self == to {
            return false;
        }
        match self {
            // Absorbing.
            Self::Terminated => false,
            // Errors can only be terminated.
            Self::Error => matches!(to, Self::Terminating | Self::Terminated),
            _ => true,
        }
    }
}

/// Backing program kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    LocalTerminal,
    RemoteShell,
    BrowserAutomation,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalTerminal => "local-terminal",
            Self::RemoteShell => "remote-shell",
            Self::BrowserAutomation => "browser-automation",
        }
    }
}

/// How the backing shell is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ShellDescriptor {
    LocalTerminal(ShellSpawnSpec),
    RemoteShell(SshDescriptor),
}

impl ShellDescriptor {
    pub fn dimensions(&self) -> (u16, u16) {
        match self {
            Self::LocalTerminal(spec) => (spec.cols, spec.rows),
            Self::RemoteShell(desc) => (desc.cols, desc.rows),
        }
    }

    pub fn set_dimensions(&mut self, cols: u16, rows: u16) {
        match self {
            Self::LocalTerminal(spec) => {
                spec.cols = cols;
                spec.rows = rows;
            }
            Self::RemoteShell(desc) => {
                desc.cols = cols;
                desc.rows = rows;
            }
        }
    }
}

/// The central entity: one entry per live or recently-terminated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub project_id: String,
    pub status: SessionStatus,
    pub activity_status: ActivityStatus,
    pub descriptor: ShellDescriptor,
    /// Owning client id; output fans out only to this client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_active_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes carried on `error` replies over the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    SessionNotFound,
    SessionTerminated,
    ProjectNotFound,
    PtySpawnFailed,
    PtyWriteFailed,
    SshConnectionFailed,
    SshAuthFailed,
    SshTimeout,
    BufferNotFound,
    InvalidMessage,
    RateLimited,
    ValidationFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionTerminated => "SESSION_TERMINATED",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::PtySpawnFailed => "PTY_SPAWN_FAILED",
            Self::PtyWriteFailed => "PTY_WRITE_FAILED",
            Self::SshConnectionFailed => "SSH_CONNECTION_FAILED",
            Self::SshAuthFailed => "SSH_AUTH_FAILED",
            Self::SshTimeout => "SSH_TIMEOUT",
            Self::BufferNotFound => "BUFFER_NOT_FOUND",
            Self::InvalidMessage => "WS_INVALID_MESSAGE",
            Self::RateLimited => "WS_RATE_LIMITED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether a client may reasonably retry the failed operation.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::SshTimeout | Self::SshConnectionFailed | Self::RateLimited)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded error paired with a short human-readable message.
///
/// Handlers convert every caught failure into one of these before it
/// reaches the connection loop.
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<ErrorCode> for GatewayError {
    fn from(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::SessionNotFound => "session not found",
            ErrorCode::SessionTerminated => "session is terminated",
            ErrorCode::ProjectNotFound => "project not found",
            ErrorCode::PtySpawnFailed => "failed to spawn shell",
            ErrorCode::PtyWriteFailed => "failed to write to shell",
            ErrorCode::SshConnectionFailed => "ssh connection failed",
            ErrorCode::SshAuthFailed => "ssh authentication failed",
            ErrorCode::SshTimeout => "ssh operation timed out",
            ErrorCode::BufferNotFound => "no buffer for session",
            ErrorCode::InvalidMessage => "invalid message",
            ErrorCode::RateLimited => "rate limit exceeded",
            ErrorCode::ValidationFailed => "payload validation failed",
            ErrorCode::Internal => "internal error",
        };
        Self::new(code, message)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

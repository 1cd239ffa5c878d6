// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Wire envelope and typed payloads for the event channel.
//!
//! Messages are flat JSON objects: the `event` field names the message,
//! payload fields sit beside it, `correlationId` is echoed verbatim on
//! replies, and every outbound message carries a server `timestamp`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ErrorCode, GatewayError};
use crate::events::now_ms;

/// Parsed inbound envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: String,
    pub correlation_id: Option<String>,
    /// The full message object; payload structs deserialize from it.
    pub payload: Value,
}

impl Envelope {
    /// Parse a raw text frame. A missing or non-string `event` field is a
    /// `WS_INVALID_MESSAGE`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| GatewayError::new(ErrorCode::InvalidMessage, e.to_string()))?;
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::new(ErrorCode::InvalidMessage, "missing event field")
            })?
            .to_owned();
        let correlation_id = value
            .get("correlationId")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(Self { event, correlation_id, payload: value })
    }

    /// Deserialize the payload into `T`, mapping serde's field error into
    /// `VALIDATION_FAILED`.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| GatewayError::new(ErrorCode::ValidationFailed, e.to_string()))
    }
}

/// Build an outbound message: event name, server timestamp, optional
/// correlation id, payload fields merged flat.
pub fn outbound(event: &str, correlation_id: Option<&str>, payload: Value) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_owned(), other);
            map
        }
    };
    object.insert("event".to_owned(), json!(event));
    object.insert("timestamp".to_owned(), json!(now_ms()));
    if let Some(id) = correlation_id {
        object.insert("correlationId".to_owned(), json!(id));
    }
    Value::Object(object)
}

/// Build an `error` reply carrying a stable code.
pub fn error_reply(error: &GatewayError, correlation_id: Option<&str>) -> Value {
    outbound(
        "error",
        correlation_id,
        json!({
            "code": error.code.as_str(),
            "message": error.message,
        }),
    )
}

// -- inbound payloads -------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatePayload {
    pub project_id: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub cwd: Option<std::path::PathBuf>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_shell() -> String {
    "bash".to_owned()
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListPayload {
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInputPayload {
    pub session_id: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResizePayload {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPayload {
    #[serde(default)]
    pub project_id: Option<String>,
    pub session_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAddPayload {
    pub id: String,
    pub name: String,
    #[serde(default = "all_shells")]
    pub shell: String,
    pub pattern: String,
    pub status: crate::status::ActivityStatus,
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn all_shells() -> String {
    "all".to_owned()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRemovePayload {
    pub pattern_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConnectPayload {
    pub project_id: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    /// `password`, `private-key`, or `keyboard-interactive`.
    pub auth_method: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Vault record to pull secrets from instead of inline fields.
    #[serde(default)]
    pub credential_id: Option<String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardInteractivePayload {
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreatePayload {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDeletePayload {
    pub project_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStorePayload {
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth_method: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDeletePayload {
    pub credential_id: String,
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use serde_json::json;

use super::*;

#[test]
fn parse_extracts_event_and_correlation() {
    let envelope = Envelope::parse(
        r#"{"event": "terminal:input", "correlationId": "cor_abc123", "sessionId": "ses_x", "data": "ls"}"#,
    )
    .unwrap();
    assert_eq!(envelope.event, "terminal:input");
    assert_eq!(envelope.correlation_id.as_deref(), Some("cor_abc123"));

    let payload: TerminalInputPayload = envelope.payload().unwrap();
    assert_eq!(payload.session_id, "ses_x");
    assert_eq!(payload.data, "ls");
}

#[test]
fn parse_rejects_non_json() {
    let err = Envelope::parse("not json").unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::InvalidMessage);
}

#[test]
fn parse_rejects_missing_event() {
    let err = Envelope::parse(r#"{"sessionId": "ses_x"}"#).unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::InvalidMessage);
}

#[test]
fn payload_failure_names_the_field() {
    let envelope =
        Envelope::parse(r#"{"event": "terminal:input", "sessionId": "ses_x"}"#).unwrap();
    let err = envelope.payload::<TerminalInputPayload>().unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::ValidationFailed);
    assert!(err.message.contains("data"), "field missing from: {}", err.message);
}

#[test]
fn outbound_merges_payload_flat() {
    let value = outbound("pong", Some("cor_1"), json!({"x": 1}));
    assert_eq!(value["event"], "pong");
    assert_eq!(value["correlationId"], "cor_1");
    assert_eq!(value["x"], 1);
    assert!(value["timestamp"].as_u64().is_some());
}

#[test]
fn outbound_without_correlation_omits_field() {
    let value = outbound("connected", None, json!({}));
    assert!(value.get("correlationId").is_none());
}

#[test]
fn error_reply_carries_stable_code() {
    let err = crate::error::GatewayError::from(crate::error::ErrorCode::SessionNotFound);
    let value = error_reply(&err, Some("cor_9"));
    assert_eq!(value["event"], "error");
    assert_eq!(value["code"], "SESSION_NOT_FOUND");
    assert_eq!(value["correlationId"], "cor_9");
}

#[test]
fn session_create_defaults_apply() {
    let envelope = Envelope::parse(
        r#"{"event": "session:create", "projectId": "prj_a"}"#,
    )
    .unwrap();
    let payload: SessionCreatePayload = envelope.payload().unwrap();
    assert_eq!(payload.shell, "bash");
    assert_eq!(payload.cols, 80);
    assert_eq!(payload.rows, 24);
}

use runbook_common::protocol::ws::{AutosaveOutcome, WsMessage};
use runbook_relay::error::ErrorCode;
use runbook_relay::ws::{HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};
use serde_json::Value;

#[test]
fn websocket_contract_heartbeat_and_frame_limits() {
    assert_eq!(HEARTBEAT_INTERVAL_MS, 15_000);
    assert_eq!(HEARTBEAT_TIMEOUT_MS, 10_000);
    assert_eq!(MAX_FRAME_BYTES, 262_144);
}

#[test]
fn websocket_contract_error_codes_are_stable() {
    assert_eq!(ErrorCode::AuthInvalidToken.as_str(), "AUTH_INVALID_TOKEN");
    assert_eq!(ErrorCode::AuthForbidden.as_str(), "AUTH_FORBIDDEN");
    assert_eq!(ErrorCode::NotFound.as_str(), "NOT_FOUND");
    assert_eq!(ErrorCode::AutosaveFailed.as_str(), "AUTOSAVE_FAILED");
    assert_eq!(ErrorCode::InternalError.as_str(), "INTERNAL_ERROR");
}

#[test]
fn websocket_contract_autosave_status_shape() {
    let saved = WsMessage::AutosaveStatus {
        status: AutosaveOutcome::Saved,
        errors: None,
        timestamp: "2026-08-30T00:00:00Z".to_string(),
    };
    let failed = WsMessage::AutosaveStatus {
        status: AutosaveOutcome::Error,
        errors: Some(vec!["autosave failed: simulated".to_string()]),
        timestamp: "2026-08-30T00:00:00Z".to_string(),
    };

    let saved_json = serde_json::to_value(saved).expect("saved status should serialize");
    assert_eq!(saved_json["type"], "autosave_status");
    assert_eq!(saved_json["status"], "saved");
    assert!(saved_json.get("errors").is_none());

    let failed_json = serde_json::to_value(failed).expect("error status should serialize");
    assert_eq!(failed_json["status"], "error");
    assert_eq!(failed_json["errors"].as_array().map(Vec::len), Some(1));
}

#[test]
fn websocket_contract_relay_error_frames_decode() {
    let raw = r#"{"type":"error","code":"COLLAB_INVALID_MESSAGE","message":"invalid websocket frame payload","retryable":false}"#;
    let parsed: WsMessage = serde_json::from_str(raw).expect("error frame should decode");
    match parsed {
        WsMessage::Error { code, retryable, .. } => {
            assert_eq!(code, "COLLAB_INVALID_MESSAGE");
            assert!(!retryable);
        }
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[test]
fn websocket_contract_client_frames_do_not_require_attribution() {
    let raw = r#"{"type":"step_update","step_index":3,"step_data":{"type":"action"}}"#;
    let parsed: Value = serde_json::to_value(
        serde_json::from_str::<WsMessage>(raw).expect("client frame should decode"),
    )
    .expect("frame should re-serialize");

    assert_eq!(parsed["step_index"], 3);
    assert!(parsed.get("user").is_none());
    assert!(parsed.get("timestamp").is_none());
}

//! Integration tests for the wire protocol.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use tool_sandbox::error::SandboxError;
use tool_sandbox::protocol::{decode_request, encode_result, ExecutionResult};

fn envelope(source: &str, params: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "code": STANDARD.encode(source),
        "params": params,
    }))
    .unwrap()
}

// === Request decoding ===

#[test]
fn well_formed_request_decodes() {
    let bytes = envelope("let x = 1;", json!({"a": 1}));
    let request = decode_request(&bytes).unwrap();
    assert_eq!(request.source, "let x = 1;");
    assert_eq!(request.params.get("a"), Some(&json!(1)));
}

#[test]
fn params_field_is_optional() {
    let bytes = serde_json::to_vec(&json!({"code": STANDARD.encode("let x = 1;")})).unwrap();
    let request = decode_request(&bytes).unwrap();
    assert!(request.params.is_empty());
}

#[test]
fn non_json_input_is_a_protocol_fault() {
    let err = decode_request(b"this is not json").unwrap_err();
    assert!(matches!(err, SandboxError::Protocol(_)));
}

#[test]
fn missing_code_field_is_a_protocol_fault() {
    let bytes = serde_json::to_vec(&json!({"params": {}})).unwrap();
    assert!(matches!(
        decode_request(&bytes).unwrap_err(),
        SandboxError::Protocol(_)
    ));
}

#[test]
fn invalid_base64_is_a_protocol_fault() {
    let bytes = serde_json::to_vec(&json!({"code": "!!not base64!!"})).unwrap();
    assert!(matches!(
        decode_request(&bytes).unwrap_err(),
        SandboxError::Protocol(_)
    ));
}

#[test]
fn non_utf8_source_is_a_protocol_fault() {
    let bytes =
        serde_json::to_vec(&json!({"code": STANDARD.encode([0xffu8, 0xfe, 0x00])})).unwrap();
    assert!(matches!(
        decode_request(&bytes).unwrap_err(),
        SandboxError::Protocol(_)
    ));
}

// === Response encoding ===

#[test]
fn success_envelope_shape() {
    let bytes = encode_result(&ExecutionResult::success(json!({"n": 3})));
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed, json!({"ok": true, "result": {"n": 3}}));
}

#[test]
fn failure_envelope_shape() {
    let bytes = encode_result(&ExecutionResult::failure("Execution timeout"));
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed, json!({"ok": false, "error": "Execution timeout"}));
}

#[test]
fn envelope_never_carries_both_fields() {
    let ok = encode_result(&ExecutionResult::success(json!(null)));
    let parsed: serde_json::Value = serde_json::from_slice(&ok).unwrap();
    assert!(parsed.get("error").is_none());

    let err = encode_result(&ExecutionResult::failure("boom"));
    let parsed: serde_json::Value = serde_json::from_slice(&err).unwrap();
    assert!(parsed.get("result").is_none());
}

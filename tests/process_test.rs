//! Process-level tests for the binary: exit codes, stdin/stdout transport,
//! and the real resource ceilings, exercised by spawning the built binary.

use std::io::Write;
use std::process::{Command, Stdio};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

fn run_binary(input: &[u8]) -> (Option<i32>, serde_json::Value) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tool-sandbox"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sandbox binary");
    child
        .stdin
        .take()
        .expect("stdin handle")
        .write_all(input)
        .expect("write request");
    let output = child.wait_with_output().expect("wait for sandbox");
    let envelope =
        serde_json::from_slice(&output.stdout).expect("stdout must carry one JSON envelope");
    (output.status.code(), envelope)
}

fn request(source: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({"code": STANDARD.encode(source), "params": {}})).unwrap()
}

// === Exit code 0: an envelope was produced ===

#[test]
fn valid_request_exits_zero_with_result_envelope() {
    let (code, envelope) = run_binary(&request("let x = 1;"));
    assert_eq!(code, Some(0));
    assert_eq!(
        envelope,
        json!({"ok": true, "result": "Code executed successfully"})
    );
}

#[test]
fn tool_result_crosses_the_process_boundary() {
    let (code, envelope) = run_binary(&request(
        r#"
        fn run() {
            return "Hello, safe world!";
        }
        let tools = {"run": run};
        "#,
    ));
    assert_eq!(code, Some(0));
    assert_eq!(envelope, json!({"ok": true, "result": "Hello, safe world!"}));
}

#[test]
fn fault_envelope_still_exits_zero() {
    let (code, envelope) = run_binary(&request("let x = 1 / 0;"));
    assert_eq!(code, Some(0));
    assert_eq!(envelope["ok"], json!(false));
    assert!(envelope["error"]
        .as_str()
        .unwrap()
        .starts_with("Execution error:"));
}

#[test]
fn capability_violation_still_exits_zero() {
    let (code, envelope) = run_binary(&request("import os"));
    assert_eq!(code, Some(0));
    assert_eq!(envelope["ok"], json!(false));
}

// === Exit code 1: the request itself was unparseable ===

#[test]
fn unparseable_request_exits_one_with_best_effort_envelope() {
    let (code, envelope) = run_binary(b"this is not json");
    assert_eq!(code, Some(1));
    assert_eq!(envelope["ok"], json!(false));
    assert!(envelope["error"]
        .as_str()
        .unwrap()
        .starts_with("Runner error:"));
}

#[test]
fn empty_input_exits_one() {
    let (code, envelope) = run_binary(b"");
    assert_eq!(code, Some(1));
    assert_eq!(envelope["ok"], json!(false));
}

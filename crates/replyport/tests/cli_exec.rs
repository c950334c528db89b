#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

use serde_json::{json, Value};

fn replyport_exec(extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_replyport"))
        .args(["--log-level", "error", "--format", "json", "exec"])
        .args(extra)
        .output()
        .expect("exec command should run")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .last()
        .unwrap_or_else(|| panic!("no stdout; stderr: {}", String::from_utf8_lossy(&output.stderr)));
    serde_json::from_str(line).expect("stdout should be one JSON object per line")
}

#[test]
fn echo_resolves_and_finishes_done() {
    let output = replyport_exec(&["echo", r#"[1, "a", null]"#]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let out = stdout_json(&output);
    assert_eq!(out["name"], "echo");
    assert_eq!(out["result"], json!([1, "a", null]));
    assert_eq!(out["completion"]["reason"], "Done");
    assert_eq!(out["completion"]["runId"], "exec");
    assert_eq!(out["completion"]["result"], json!([1, "a", null]));
}

#[test]
fn bootstrap_payload_reaches_the_worker() {
    let output = replyport_exec(&["payload", "--run-id", "payload-run"]);
    assert_eq!(output.status.code(), Some(0));

    let out = stdout_json(&output);
    assert_eq!(out["result"], json!({"call": "payload"}));
    assert_eq!(out["completion"]["runId"], "payload-run");
}

#[test]
fn remote_error_is_surfaced_verbatim() {
    let output = replyport_exec(&["fail", r#""disk on fire""#]);
    assert_eq!(output.status.code(), Some(1));

    let out = stdout_json(&output);
    assert_eq!(out["error"], "disk on fire");
    assert!(out.get("result").is_none());
}

#[test]
fn unknown_handler_is_reported_not_hung() {
    let output = replyport_exec(&["nope", "--timeout", "5s"]);
    assert_eq!(output.status.code(), Some(1));

    let out = stdout_json(&output);
    assert_eq!(out["error"], "\"nope\" doesn't have handler");
}

#[test]
fn worker_crash_finishes_with_error() {
    let output = replyport_exec(&["exit", "3"]);
    assert_eq!(output.status.code(), Some(1));

    let out = stdout_json(&output);
    assert_eq!(out["completion"]["reason"], "Error");
}

#[test]
fn deadline_expiry_is_a_single_timeout() {
    let output = replyport_exec(&["sleep", "10000", "--deadline", "500ms", "--timeout", "30s"]);
    assert_eq!(output.status.code(), Some(124));

    let out = stdout_json(&output);
    assert_eq!(out["completion"]["reason"], "Timeout");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 1);
}

#[test]
fn call_timeout_exits_124() {
    let output = replyport_exec(&["sleep", "10000", "--timeout", "300ms"]);
    assert_eq!(output.status.code(), Some(124));

    let out = stdout_json(&output);
    assert!(out["error"].as_str().unwrap().contains("timed out"));
    assert_eq!(out["completion"]["reason"], "Terminated");
}

#[test]
fn invalid_call_args_are_a_usage_error() {
    let output = replyport_exec(&["echo", "{not json"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn schema_dir_checks_worker_arguments() {
    let dir = std::env::temp_dir().join(format!("replyport-exec-schemas-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    std::fs::write(
        dir.join("echo.schema.json"),
        r#"{"type":"array","items":{"type":"number"}}"#,
    )
    .expect("schema file");
    let dir_arg = dir.to_str().expect("utf-8 temp path");

    let ok = replyport_exec(&["echo", "[1, 2]", "--schema-dir", dir_arg]);
    assert_eq!(ok.status.code(), Some(0));
    assert_eq!(stdout_json(&ok)["result"], json!([1, 2]));

    let bad = replyport_exec(&["echo", r#"["a"]"#, "--schema-dir", dir_arg]);
    assert_eq!(bad.status.code(), Some(1));
    let out = stdout_json(&bad);
    assert!(out["error"]
        .as_str()
        .expect("error message")
        .starts_with("schema validation failed for echo"));

    let _ = std::fs::remove_dir_all(&dir);
}

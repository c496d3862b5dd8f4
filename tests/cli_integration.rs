// CLI integration tests for decode, check-config, and manifest runs.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::{Value, json};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_otai-remote");
    Command::new(exe)
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn stdout_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(parse_json)
        .collect()
}

fn stderr_error(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .rev()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    parse_json(line)["error"].clone()
}

fn write_json(path: &Path, value: &Value) -> TestResult<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[test]
fn decode_reports_linecard_scope() {
    let output = cmd()
        .args(["decode", "oid:0x1000000000000"])
        .output()
        .expect("decode");
    assert!(output.status.success());
    let value = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(value["object_type"], "OTAI_OBJECT_TYPE_LINECARD");
    assert_eq!(value["linecard_id"], "oid:0x1000000000000");
    assert_eq!(value["linecard_index"], 0);
    assert_eq!(value["global_context"], 0);
}

#[test]
fn decode_rejects_malformed_id() {
    let output = cmd().args(["decode", "12345"]).output().expect("decode");
    assert_eq!(output.status.code(), Some(6));
    let error = stderr_error(&output);
    assert_eq!(error["kind"], "InvalidParameter");
    assert_eq!(error["status"], "OTAI_STATUS_INVALID_PARAMETER");
}

#[test]
fn check_config_normalises_and_rejects() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let good = temp.path().join("good.json");
    write_json(&good, &json!({"global_context": 1, "buffered": true}))?;
    let output = cmd()
        .args(["check-config", good.to_str().expect("path")])
        .output()?;
    assert!(output.status.success());
    let value = parse_json(std::str::from_utf8(&output.stdout)?);
    assert_eq!(value["global_context"], 1);
    assert_eq!(value["notification_delivery"], "inline");
    assert_eq!(value["linecards"][0]["index"], 0);

    let bad = temp.path().join("bad.json");
    write_json(
        &bad,
        &json!({"linecards": [{"index": 1}, {"index": 1, "hardware_info": "x"}]}),
    )?;
    let output = cmd()
        .args(["check-config", bad.to_str().expect("path")])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_error(&output)["kind"], "Usage");
    Ok(())
}

#[test]
fn run_manifest_drives_full_flow() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let manifest = temp.path().join("steps.json");
    write_json(
        &manifest,
        &json!({
            "steps": [
                {"op": "initialize"},
                {
                    "id": "linecard",
                    "op": "create",
                    "object_type": "OTAI_OBJECT_TYPE_LINECARD",
                    "attrs": [{"id": 1, "value": {"type": "pointer", "value": true}}],
                    "save_as": "lc",
                    "expect": {"object_id": "oid:0x1000000000000"}
                },
                {
                    "op": "create",
                    "object_type": "OTAI_OBJECT_TYPE_PORT",
                    "linecard_id": "$lc",
                    "attrs": [{"id": 3, "value": {"type": "u32", "value": 7}}],
                    "save_as": "port"
                },
                {
                    "op": "get",
                    "object_type": "OTAI_OBJECT_TYPE_PORT",
                    "object_id": "$port",
                    "attrs": [{"id": 3, "value": {"type": "null"}}],
                    "expect": {"attrs": [{"id": 3, "value": {"type": "u32", "value": 7}}]}
                },
                {
                    "op": "set_counter",
                    "object_type": "OTAI_OBJECT_TYPE_PORT",
                    "object_id": "$port",
                    "name": "OTAI_PORT_STAT_INPUT_POWER",
                    "value": "-3.5"
                },
                {
                    "op": "get_stats",
                    "object_type": "OTAI_OBJECT_TYPE_PORT",
                    "object_id": "$port",
                    "counters": [0],
                    "expect": {"values": [-3.5]}
                },
                {"op": "flush", "linecard_id": "$lc"},
                {
                    "op": "emit",
                    "name": "linecard_state_change",
                    "body": {"linecard_id": "oid:0x1000000000000", "oper_status": "ACTIVE"},
                    "expect": {"delivered": true}
                },
                {
                    "id": "duplicate",
                    "op": "create",
                    "object_type": "OTAI_OBJECT_TYPE_LINECARD",
                    "expect": {"error": {"kind": "ItemAlreadyExists"}}
                },
                {"op": "inject_reply", "status": "OTAI_STATUS_SUCCESS"},
                {
                    "id": "desync",
                    "op": "get",
                    "object_type": "OTAI_OBJECT_TYPE_PORT",
                    "object_id": "$port",
                    "attrs": [{"id": 3, "value": {"type": "null"}}],
                    "expect": {"error": {"kind": "ProtocolDesync", "fatal": true}}
                },
                {"op": "uninitialize"}
            ]
        }),
    )?;

    let output = cmd()
        .args(["run", manifest.to_str().expect("path")])
        .output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 12);
    assert_eq!(lines[1]["id"], "linecard");
    assert_eq!(lines[7]["result"]["delivered"], true);
    assert_eq!(lines[8]["error"]["status"], "OTAI_STATUS_ITEM_ALREADY_EXISTS");
    assert_eq!(lines[10]["error"]["fatal"], true);
    Ok(())
}

#[test]
fn run_manifest_stops_at_unexpected_error() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let manifest = temp.path().join("steps.json");
    write_json(
        &manifest,
        &json!({
            "steps": [
                {"op": "initialize"},
                {
                    "id": "orphan",
                    "op": "remove",
                    "object_type": "OTAI_OBJECT_TYPE_PORT",
                    "object_id": "oid:0x3000000000001"
                },
                {"op": "uninitialize"}
            ]
        }),
    )?;

    let output = cmd()
        .args(["run", manifest.to_str().expect("path")])
        .output()?;
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout_lines(&output).len(), 1);
    let error = stderr_error(&output);
    assert_eq!(error["kind"], "ItemNotFound");
    assert!(
        error["message"]
            .as_str()
            .expect("message")
            .contains("step 1 (orphan)")
    );
    Ok(())
}

#[test]
fn run_uses_config_linecard_table() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let config = temp.path().join("otai.json");
    write_json(
        &config,
        &json!({"linecards": [{"index": 2, "hardware_info": "slot-2"}]}),
    )?;
    let manifest = temp.path().join("steps.json");
    write_json(
        &manifest,
        &json!({
            "steps": [
                {"op": "initialize"},
                {
                    "op": "create",
                    "object_type": "OTAI_OBJECT_TYPE_LINECARD",
                    "attrs": [{"id": 0, "value": {"type": "str", "value": "slot-2"}}],
                    "expect": {"object_id": "oid:0x1020000000002"}
                }
            ]
        }),
    )?;

    let output = cmd()
        .args([
            "--config",
            config.to_str().expect("path"),
            "run",
            manifest.to_str().expect("path"),
        ])
        .output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

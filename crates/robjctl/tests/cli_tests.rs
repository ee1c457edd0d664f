//! Integration tests for robjctl
//!
//! Each test drives the binary against an in-process server bound to an
//! ephemeral loopback port.

use std::fs;
use std::sync::Arc;

use assert_cmd::Command;
use predicates::prelude::*;
use remote_objects::objects::SharedMap;
use remote_objects::{Server, ServerConfig, Value};
use tempfile::TempDir;

fn robjctl() -> Command {
    let mut cmd = Command::cargo_bin("robjctl").expect("robjctl binary");
    cmd.env_remove("ROBJCTL_ENDPOINT")
        .env_remove("ROBJCTL_CONFIG")
        .env("NO_COLOR", "1");
    cmd
}

/// Server exporting a map holding `counter => 1`.
fn counter_server() -> (Server, String) {
    let root = SharedMap::with_entries([(Value::sym("counter"), Value::Int(1))]);
    let server = Server::bind(ServerConfig::bind("127.0.0.1", 0), Arc::new(root)).expect("bind");
    let endpoint = server.local_addr().to_string();
    (server, endpoint)
}

/// Endpoint nothing listens on.
fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr.to_string()
}

#[test]
fn test_cli_help() {
    robjctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote objects protocol"));
}

#[test]
fn test_cli_version() {
    robjctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("robjctl"));
}

#[test]
fn test_completion_generation() {
    robjctl()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("robjctl"));
}

#[test]
fn test_call_reads_remote_value() {
    let (_server, endpoint) = counter_server();
    robjctl()
        .args(["call", "--endpoint", &endpoint, "[]", ":counter"])
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn test_call_json_output() {
    let (_server, endpoint) = counter_server();
    let output = robjctl()
        .args(["--json", "call", "-e", &endpoint, "increment", ":counter", "4"])
        .output()
        .expect("run robjctl");
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["success"], serde_json::json!(true));
    assert_eq!(parsed["result"], serde_json::json!(5));
}

#[test]
fn test_call_with_block_prints_yields() {
    let (_server, endpoint) = counter_server();
    robjctl()
        .args(["call", "-e", &endpoint, "--block", "each"])
        .assert()
        .success()
        .stdout(predicate::str::contains("yield :counter, 1"))
        .stdout(predicate::str::ends_with("nil\n"));
}

#[test]
fn test_call_without_block_reports_remote_error() {
    let (_server, endpoint) = counter_server();
    robjctl()
        .args(["call", "-e", &endpoint, "each"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("LocalJumpError"));
}

#[test]
fn test_unknown_method_exit_code() {
    let (_server, endpoint) = counter_server();
    robjctl()
        .args(["call", "-e", &endpoint, "frobnicate"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("frobnicate"));
}

#[test]
fn test_denied_method_exit_code() {
    let (_server, endpoint) = counter_server();
    robjctl()
        .args(["--json", "call", "-e", &endpoint, "send", ":size"])
        .assert()
        .code(6)
        .stdout(predicate::str::contains("permission_denied"));
}

#[test]
fn test_unreachable_endpoint_exit_code() {
    robjctl()
        .args(["call", "-e", &dead_endpoint(), "size"])
        .assert()
        .code(5);
}

#[test]
fn test_invalid_config_file_exit_code() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("robjctl.json");
    fs::write(&path, r#"{ "max_frame_size": 0 }"#).expect("write config");

    robjctl()
        .args(["--config"])
        .arg(&path)
        .args(["call", "size"])
        .assert()
        .code(4);
}

#[test]
fn test_config_file_selects_serializer() {
    let root = SharedMap::with_entries([(Value::sym("counter"), Value::Int(1))]);
    let json = remote_objects::ConnectionConfig::builder()
        .serializer(remote_objects::SerializerKind::Json)
        .build()
        .expect("config");
    let server = Server::bind(
        ServerConfig::bind("127.0.0.1", 0).with_connection(json.clone()),
        Arc::new(root),
    )
    .expect("bind");

    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("robjctl.json");
    fs::write(&path, serde_json::to_string(&json).expect("serialize")).expect("write config");

    robjctl()
        .arg("--config")
        .arg(&path)
        .args(["call", "-e", &server.local_addr().to_string(), "size"])
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn test_bench_counts_every_increment() {
    let (_server, endpoint) = counter_server();
    let output = robjctl()
        .args([
            "--json", "bench", "-e", &endpoint, "-n", "200", "--threads", "4",
        ])
        .output()
        .expect("run robjctl");
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["bench"]["final_value"], serde_json::json!(201));
    assert_eq!(parsed["bench"]["iterations"], serde_json::json!(200));
}

#[test]
fn test_bench_initializes_missing_key() {
    let (_server, endpoint) = counter_server();
    robjctl()
        .args(["bench", "-e", &endpoint, "-n", "10", "--key", "fresh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Final value: 11"));
}

#[test]
fn test_serve_rejects_malformed_entry() {
    robjctl()
        .args(["serve", "--listen", "127.0.0.1:0", "--set", "oops"])
        .assert()
        .code(4);
}

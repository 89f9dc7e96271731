//! Integration tests for the `acikit` CLI binary.
//!
//! Argument parsing, help output and completions run without a controller;
//! the command tests point the binary at a wiremock server.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `acikit` binary with env isolation.
///
/// Clears all `ACIKIT_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn acikit_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("acikit");
    cmd.env("HOME", "/tmp/acikit-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/acikit-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("ACIKIT_PROFILE")
        .env_remove("ACIKIT_URL")
        .env_remove("ACIKIT_LOGIN")
        .env_remove("ACIKIT_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

async fn controller_with_login(status: u16) -> MockServer {
    let server = MockServer::start().await;
    let body = if status == 200 {
        json!({ "imdata": [{ "aaaLogin": { "attributes": {
            "token": "T1", "refreshTimeoutSeconds": "300"
        }}}]})
    } else {
        json!({ "imdata": [{ "error": { "attributes": {
            "code": "401", "text": "Username or password is incorrect"
        }}}]})
    };
    Mock::given(method("POST"))
        .and(path("/api/aaaLogin.json"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/aaaLogout.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [] })))
        .mount(&server)
        .await;
    server
}

/// Run the binary off the async runtime so wiremock keeps serving.
async fn run(args: Vec<String>) -> std::process::Output {
    tokio::task::spawn_blocking(move || acikit_cmd().args(args).output().unwrap())
        .await
        .unwrap()
}

fn with_server(server: &MockServer, rest: &[&str]) -> Vec<String> {
    let mut args = vec![
        "--url".to_owned(),
        server.uri(),
        "--login".to_owned(),
        "admin".to_owned(),
        "--password".to_owned(),
        "secret".to_owned(),
    ];
    args.extend(rest.iter().map(|s| (*s).to_owned()));
    args
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = acikit_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    acikit_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("class")
            .and(predicate::str::contains("show"))
            .and(predicate::str::contains("push"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("search")),
    );
}

#[test]
fn test_version_flag() {
    acikit_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("acikit"));
}

#[test]
fn test_completions_bash() {
    acikit_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = acikit_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_missing_profile_without_url() {
    acikit_cmd()
        .args(["class", "fvTenant"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Profile"));
}

#[test]
fn test_missing_password() {
    acikit_cmd()
        .args(["--url", "https://apic.invalid", "class", "fvTenant"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("credentials"));
}

#[test]
fn test_watch_requires_count_to_be_a_number() {
    let output = acikit_cmd()
        .args(["watch", "fvTenant", "--count", "many"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Against a controller ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_class_lists_dns() {
    let server = controller_with_login(200).await;
    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [
            { "fvTenant": { "attributes": { "dn": "uni/tn-common", "name": "common" } } },
            { "fvTenant": { "attributes": { "dn": "uni/tn-t1", "name": "t1" } } }
        ]})))
        .mount(&server)
        .await;

    let output = run(with_server(&server, &["-o", "plain", "class", "fvTenant"])).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "uni/tn-common\nuni/tn-t1"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_password_exits_with_auth_code() {
    let server = controller_with_login(401).await;
    let output = run(with_server(&server, &["class", "fvTenant"])).await;
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_show_missing_dn_exits_not_found() {
    let server = controller_with_login(200).await;
    Mock::given(method("GET"))
        .and(path("/api/mo/uni/tn-nope.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [] })))
        .mount(&server)
        .await;

    let output = run(with_server(&server, &["show", "uni/tn-nope"])).await;
    assert_eq!(output.status.code(), Some(4), "{}", combined_output(&output));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_by_keyword() {
    let server = controller_with_login(200).await;
    Mock::given(method("GET"))
        .and(path("/api/mo/uni/tn-t1.json"))
        .and(query_param("rsp-subtree", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [
            { "fvTenant": {
                "attributes": { "dn": "uni/tn-t1", "name": "t1" },
                "children": [{ "fvBD": { "attributes": { "dn": "uni/tn-t1/BD-web", "name": "web" } } }]
            }}
        ]})))
        .mount(&server)
        .await;

    let output = run(with_server(
        &server,
        &["-o", "plain", "search", "name=web", "--tenant", "t1"],
    ))
    .await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "uni/tn-t1/BD-web");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_rejection_is_reported() {
    let server = controller_with_login(200).await;
    Mock::given(method("POST"))
        .and(path("/api/mo/uni.json"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "imdata": [
            { "error": { "attributes": { "code": "103", "text": "Unknown class" } } }
        ]})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("tenant.json");
    std::fs::write(&file, r#"{"fvTenant": {"attributes": {"name": "t9"}}}"#).unwrap();

    let file_arg = file.display().to_string();
    let output = run(with_server(&server, &["push", file_arg.as_str()])).await;
    assert_eq!(output.status.code(), Some(6), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("Unknown class"));
}

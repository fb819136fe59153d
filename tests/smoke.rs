//! Smoke tests -- verify the binary runs and the profile commands work
//! against a scratch database.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn proxyping(dir: &TempDir) -> Command {
    let config = dir.path().join("proxyping.toml");
    std::fs::write(&config, "[logging]\nlevel = \"warn\"\n").unwrap();

    let mut cmd = Command::cargo_bin("proxyping").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("--db")
        .arg(dir.path().join("profiles.db"));
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("proxyping")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Connectivity testing for saved proxy profiles"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("proxyping")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("proxyping"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["test", "list", "add", "clear", "prune"] {
        Command::cargo_bin("proxyping")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_unknown_probe_kind_rejected() {
    Command::cargo_bin("proxyping")
        .unwrap()
        .args(["test", "--group", "1", "--kind", "udp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown probe kind"));
}

#[test]
fn test_add_then_list() {
    let dir = TempDir::new().unwrap();

    proxyping(&dir)
        .args(["add", "--group", "3", "--name", "tokyo", "--server", "203.0.113.9"])
        .args(["--port", "443", "--protocol", "trojan", "--transport", "ws"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Profile 'tokyo' added"));

    proxyping(&dir)
        .args(["list", "--group", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tokyo").and(predicate::str::contains("initial")));

    proxyping(&dir)
        .args(["list", "--group", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No profiles in group 4."));
}

#[test]
fn test_list_json() {
    let dir = TempDir::new().unwrap();

    proxyping(&dir)
        .args(["add", "--group", "1", "--name", "home", "--server", "192.0.2.1"])
        .args(["--port", "1080", "--protocol", "socks"])
        .assert()
        .success();

    let output = proxyping(&dir).args(["list", "--group", "1", "--json"]).output().unwrap();
    assert!(output.status.success());
    let profiles: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(profiles[0]["name"], "home");
    assert_eq!(profiles[0]["port"], 1080);
    assert_eq!(profiles[0]["status"], "Initial");
}

#[test]
fn test_add_rejects_unknown_protocol() {
    let dir = TempDir::new().unwrap();

    proxyping(&dir)
        .args(["add", "--group", "1", "--name", "x", "--server", "192.0.2.1"])
        .args(["--port", "1", "--protocol", "carrier-pigeon"])
        .assert()
        .failure();
}

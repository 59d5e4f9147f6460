//! Integration tests for the tzsp-server binary

use assert_cmd::Command;
use predicates::prelude::*;

fn tzsp_server() -> Command {
    let mut cmd = Command::cargo_bin("tzsp-server").unwrap();
    cmd.env_remove("TZSP_CONFIG")
        .env_remove("TZSP_PORT")
        .env_remove("TZSP_LOG_LEVEL");
    cmd
}

#[test]
fn test_help_lists_commands() {
    tzsp_server()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("--analyzer"));
}

#[test]
fn test_generate_then_validate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.toml");

    tzsp_server()
        .current_dir(dir.path())
        .args(["config", "generate", "--output"])
        .arg(&path)
        .assert()
        .success();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("port = 37008"));
    assert!(content.contains("queue_size = 50000"));

    tzsp_server()
        .current_dir(dir.path())
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));

    // Refuses to overwrite without --force
    tzsp_server()
        .current_dir(dir.path())
        .args(["config", "generate", "--output"])
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn test_validate_rejects_missing_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.toml");
    std::fs::write(&path, "[plugins]\npaths = [\"/nonexistent/libanalyzers.so\"]\n").unwrap();

    tzsp_server()
        .current_dir(dir.path())
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn test_run_fails_on_missing_analyzer() {
    let dir = tempfile::tempdir().unwrap();
    tzsp_server()
        .current_dir(dir.path())
        .args(["run", "-a", "/nonexistent/libanalyzers.so"])
        .assert()
        .failure();
}

#[test]
fn test_completions() {
    tzsp_server()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tzsp-server"));
}

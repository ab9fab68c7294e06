//! CLI end-to-end tests

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[allow(deprecated)]
fn scenestream_cmd() -> Command {
    Command::cargo_bin("scenestream").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    scenestream_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    scenestream_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("scenestream"));
}

#[test]
fn test_cli_qualities_lists_table() {
    scenestream_cmd()
        .arg("qualities")
        .assert()
        .success()
        .stdout(predicate::str::contains("2160p"))
        .stdout(predicate::str::contains("1280x720"))
        .stdout(predicate::str::contains("240p"));
}

#[test]
fn test_cli_check_tools_always_succeeds() {
    scenestream_cmd()
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"));
}

#[test]
fn test_cli_validate_valid_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[server]
port = 9090

[transcode]
default_qualities = ["1080p", "480p"]
"#,
    )
    .unwrap();

    scenestream_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("0.0.0.0:9090"))
        .stdout(predicate::str::contains("1080p, 480p"));
}

#[test]
fn test_cli_validate_rejects_unknown_quality() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[transcode]\ndefault_qualities = [\"4k\"]\n").unwrap();

    scenestream_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("default_qualities"));
}

#[test]
fn test_cli_validate_missing_file_fails() {
    scenestream_cmd()
        .args(["validate", "/nonexistent/scenestream.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

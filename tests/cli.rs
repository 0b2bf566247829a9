//! Integration tests for the warden CLI.
//!
//! These tests verify the CLI binary behavior by running the actual executable
//! and checking output and exit codes. Nothing here talks to Docker or
//! firewalld; session-launching paths are covered by unit tests with fakes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the warden binary.
#[allow(deprecated)]
fn warden() -> Command {
    Command::cargo_bin("warden").expect("failed to find warden binary")
}

/// Creates a Command for warden running in a specific directory.
fn warden_in(dir: &TempDir) -> Command {
    let mut cmd = warden();
    cmd.current_dir(dir.path());
    cmd
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    warden()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("warden"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("down"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_version_shows_version() {
    warden()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("warden"));
}

#[test]
fn test_run_help_shows_all_options() {
    warden()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tool"))
        .stdout(predicate::str::contains("--network"));
}

// -----------------------------------------------------------------------------
// Status command tests
// -----------------------------------------------------------------------------

#[test]
fn test_status_with_defaults() {
    let dir = TempDir::new().unwrap();

    warden_in(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Network: open"))
        .stdout(predicate::str::contains("claude"));
}

#[test]
fn test_status_reads_config_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("warden.toml"),
        r#"
[network]
mode = "allowlist"
allowed_domains = ["api.anthropic.com", "github.com"]
"#,
    )
    .unwrap();

    warden_in(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Network: allowlist"))
        .stdout(predicate::str::contains("api.anthropic.com"))
        .stdout(predicate::str::contains("github.com"));
}

#[test]
fn test_status_restricted_shows_blocked_ranges() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("warden.toml"),
        "[network]\nmode = \"restricted\"\n",
    )
    .unwrap();

    warden_in(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("RFC1918"))
        .stdout(predicate::str::contains("metadata"));
}

#[test]
fn test_status_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("warden.toml"), "{not toml").unwrap();

    warden_in(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("warden.toml"));
}

// -----------------------------------------------------------------------------
// Run command tests (without launching containers)
// -----------------------------------------------------------------------------

#[test]
fn test_run_unknown_tool_lists_supported() {
    let dir = TempDir::new().unwrap();

    // Tool lookup happens before any container work.
    warden_in(&dir)
        .args(["run", "--tool", "nonexistent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown tool"))
        .stderr(predicate::str::contains("claude"));
}

#[test]
fn test_run_invalid_network_mode_shows_options() {
    let dir = TempDir::new().unwrap();

    warden_in(&dir)
        .args(["run", "--network", "invalid"])
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("open")
                .and(predicate::str::contains("restricted"))
                .and(predicate::str::contains("allowlist")),
        );
}

// -----------------------------------------------------------------------------
// Error message tests
// -----------------------------------------------------------------------------

#[test]
fn test_unknown_command_suggests_help() {
    warden()
        .arg("unknown")
        .assert()
        .failure()
        .stderr(predicate::str::contains("help"));
}

#[test]
fn test_down_requires_container_name() {
    warden().arg("down").assert().failure();
}

// -----------------------------------------------------------------------------
// Verbose flag tests
// -----------------------------------------------------------------------------

#[test]
fn test_verbose_flag_global() {
    let dir = TempDir::new().unwrap();

    // -v should work as a global flag
    warden_in(&dir).args(["-v", "status"]).assert().success();
}

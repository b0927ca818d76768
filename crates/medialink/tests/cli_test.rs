//! Integration tests for the `medialink` CLI binary.
//!
//! Argument parsing, configuration errors, and the offline cache commands.
//! Nothing here needs a live media server.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `medialink` binary with env isolation.
///
/// Clears every `MEDIALINK_*` variable and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn medialink_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("medialink");
    cmd.env("HOME", "/tmp/medialink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/medialink-cli-test-nonexistent")
        .env("XDG_CACHE_HOME", "/tmp/medialink-cli-test-nonexistent")
        .env_remove("RUST_LOG");
    for var in [
        "MEDIALINK_PROFILE",
        "MEDIALINK_CONFIG",
        "MEDIALINK_HOST",
        "MEDIALINK_PORT",
        "MEDIALINK_WS_PORT",
        "MEDIALINK_USERNAME",
        "MEDIALINK_PASSWORD",
        "MEDIALINK_INSECURE",
        "MEDIALINK_TIMEOUT",
        "MEDIALINK_OUTPUT",
        "MEDIALINK_LOG_FILE",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Write a config whose snapshot cache lives under `dir`.
fn write_config(dir: &Path, profiles: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let body = format!(
        "default_profile = \"den\"\n\n[defaults]\ncache_dir = {:?}\n\n{profiles}",
        dir.join("snapshots").display().to_string()
    );
    std::fs::write(&path, body).unwrap();
    path
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = medialink_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    medialink_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("mark"))
            .and(predicate::str::contains("cache")),
    );
}

#[test]
fn test_version_flag() {
    medialink_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("medialink"));
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_mark_rejects_bad_key() {
    medialink_cmd()
        .args(["mark", "song-12", "played"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("song:12"));
}

#[test]
fn test_mark_requires_a_change() {
    medialink_cmd()
        .args(["mark", "song:12"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_mark_changes_are_exclusive() {
    medialink_cmd()
        .args(["mark", "song:12", "played", "--rating", "4"])
        .assert()
        .code(2);
}

#[test]
fn test_rating_range_is_enforced() {
    medialink_cmd()
        .args(["mark", "movie:3", "--rating", "11"])
        .assert()
        .code(2);
}

#[test]
fn test_bad_scope_is_rejected() {
    medialink_cmd()
        .args(["--scope", "photos", "cache", "path"])
        .assert()
        .code(2);
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn test_status_without_server_explains_setup() {
    medialink_cmd()
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No server configured"));
}

#[test]
fn test_unknown_profile_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[profiles.den]\nhost = \"den.local\"\n");
    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--profile", "attic", "status"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("attic").and(predicate::str::contains("den")));
}

#[test]
fn test_invalid_host_is_usage_error() {
    medialink_cmd()
        .args(["--host", "bad host", "--no-cache", "status"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("host"));
}

// ── Cache commands ──────────────────────────────────────────────────

#[test]
fn test_cache_path_uses_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("snapshots"));
}

#[test]
fn test_cache_show_without_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[profiles.den]\nhost = \"den.local\"\n");
    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["cache", "show"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No snapshot for den.local:8080/all"));
}

#[test]
fn test_cache_show_reads_saved_segments() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[profiles.den]\nhost = \"den.local\"\nscope = \"music\"\n");
    let segment_dir = dir.path().join("snapshots").join("den.local_8080").join("music");
    std::fs::create_dir_all(&segment_dir).unwrap();
    std::fs::write(
        segment_dir.join("songs.json"),
        r#"{"version":1,"segment":"songs","saved_at":"2026-10-19T20:00:00Z",
            "data":{"kind":"items","value":[{"song":{"songid":1,"label":"One"}},{"song":{"songid":2,"label":"Two"}}]}}"#,
    )
    .unwrap();

    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--output", "plain", "cache", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("songs\t2"));
}

#[test]
fn test_cache_clear_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[profiles.den]\nhost = \"den.local\"\n");
    for _ in 0..2 {
        medialink_cmd()
            .arg("--config")
            .arg(&config)
            .args(["cache", "clear"])
            .assert()
            .success()
            .stderr(predicate::str::contains("cleared"));
    }
}

// ── Config commands ─────────────────────────────────────────────────

#[test]
fn test_config_set_creates_and_updates_profile() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    for (key, value) in [("host", "den.local"), ("port", "8081"), ("scope", "music")] {
        medialink_cmd()
            .arg("--config")
            .arg(&config)
            .args(["config", "set", key, value])
            .assert()
            .success();
    }

    let body = std::fs::read_to_string(&config).unwrap();
    assert!(body.contains("[profiles.den]"), "{body}");
    assert!(body.contains("host = \"den.local\""), "{body}");
    assert!(body.contains("http_port = 8081"), "{body}");

    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "set", "scope", "photos"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("scope"));
}

#[test]
fn test_config_use_switches_default_profile() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "[profiles.den]\nhost = \"den.local\"\n\n[profiles.loft]\nhost = \"loft.local\"\n",
    );
    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "use", "loft"])
        .assert()
        .success();

    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("loft *").and(predicate::str::contains("den\n")));

    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "use", "attic"])
        .assert()
        .code(2);
}

#[test]
fn test_set_password_rejects_unknown_profile_and_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[profiles.den]\nhost = \"den.local\"\n");
    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["--profile", "attic", "config", "set-password", "--stdin"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("attic"));

    medialink_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "set-password", "--stdin"])
        .write_stdin("\n")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("password"));
}

// ── Unreachable server ──────────────────────────────────────────────

#[test]
fn test_status_against_closed_port_reports_not_ready() {
    medialink_cmd()
        .args([
            "--host", "127.0.0.1", "--port", "1", "--ws-port", "1", "--no-cache", "status",
            "--wait", "1s",
        ])
        .assert()
        .code(7)
        .stdout(predicate::str::contains("127.0.0.1:1/all"))
        .stderr(predicate::str::contains("not ready"));
}

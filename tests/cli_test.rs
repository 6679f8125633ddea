//! Integration tests for the `rbv` binary.
//!
//! None of these reach the network: each one fails (or succeeds) before a
//! remote store would be contacted.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn rbv_bin() -> String {
    env!("CARGO_BIN_EXE_rbv").to_string()
}

fn rbv(args: &[&str]) -> Output {
    Command::new(rbv_bin())
        .args(args)
        .env_remove("RBV_CONFIG")
        .env("RUST_LOG", "rbv=info")
        .output()
        .unwrap()
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("config.toml");
    fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_help_lists_commands() {
    let output = rbv(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("process"));
    assert!(stdout.contains("upload"));
    assert!(stdout.contains("doctor"));
    assert!(stdout.contains("init"));
}

#[test]
fn test_fetch_without_preprocess_folders_is_config_error() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        "[auth]\napp_key = \"key\"\napp_secret = \"secret\"\nrefresh_token = \"token\"\n\n[paths]\npostprocess_soundcloud = \"/out\"\n",
    );
    let output = rbv(&["--config", &config, "process"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("preprocess_live"), "stderr: {}", stderr);
}

#[test]
fn test_init_keeps_existing_config_when_declined() {
    let dir = TempDir::new().unwrap();
    let body = "[paths]\npostprocess_soundcloud = \"/out\"\n";
    let config = write_config(dir.path(), body);

    let mut child = Command::new(rbv_bin())
        .args(["--config", &config, "init"])
        .env_remove("RBV_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"n\n").unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Overwrite?"), "stdout: {}", stdout);
    assert!(stdout.contains("unchanged"), "stdout: {}", stdout);
    assert_eq!(fs::read_to_string(&config).unwrap(), body);
}

#[test]
fn test_missing_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");
    let output = rbv(&["--config", missing.to_str().unwrap(), "upload", "a.mp3"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nope.toml"), "stderr: {}", stderr);
}

#[test]
fn test_upload_without_auth_is_config_error() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        "[paths]\npostprocess_soundcloud = \"/out\"\n",
    );
    let output = rbv(&["--config", &config, "upload", "a.mp3"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[auth]"), "stderr: {}", stderr);
}

#[cfg(unix)]
#[test]
fn test_process_without_host_fails_before_upload() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("show.mp3");
    fs::write(&input, b"raw audio").unwrap();

    let config = write_config(
        dir.path(),
        &format!(
            r#"
[auth]
app_key = "key"
app_secret = "secret"
refresh_token = "token"

[paths]
postprocess_soundcloud = "/out"

[pipe]
to_host = '{}'
from_host = '{}'
"#,
            dir.path().join("to").display(),
            dir.path().join("from").display()
        ),
    );

    let output = rbv(&["--config", &config, "process", input.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pipe not found"), "stderr: {}", stderr);
    // input is left alone
    assert!(input.exists());
}

#[cfg(unix)]
#[test]
fn test_doctor_reports_missing_pipe() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            "[paths]\npostprocess_soundcloud = \"/out\"\n\n[pipe]\nto_host = '{}'\nfrom_host = '{}'\n",
            dir.path().join("to").display(),
            dir.path().join("from").display()
        ),
    );

    let output = rbv(&["--config", &config, "doctor"]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pipe to host"), "stdout: {}", stdout);
    assert!(stdout.contains("not found"), "stdout: {}", stdout);
    assert!(stdout.contains("[auth] section is required"), "stdout: {}", stdout);
}

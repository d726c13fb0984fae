//! CLI end-to-end tests
//!
//! Tests for the mp3ify command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the mp3ify binary
#[allow(deprecated)]
fn mp3ify_cmd() -> Command {
    Command::cargo_bin("mp3ify").unwrap()
}

/// Write a config whose converter is a shell script.
fn write_sh_config(dir: &Path, script: &str) -> std::path::PathBuf {
    let config_path = dir.join("config.toml");
    let content = format!(
        r#"
[storage]
data_dir = "{}"

[converter]
program = "sh"
args = ["-c", '{}', "sh", "{{source}}"]
kill_grace_secs = 1
"#,
        dir.join("data").display(),
        script
    );
    fs::write(&config_path, content).unwrap();
    config_path
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = mp3ify_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = mp3ify_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mp3ify"))
        .stdout(predicate::str::contains("convert"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = mp3ify_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_validate_default_config() {
    let mut cmd = mp3ify_cmd();
    cmd.arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("yt-dlp"));
}

#[test]
fn test_cli_validate_config_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[server]
port = 9090

[engine]
max_concurrent = 0
"#,
    )
    .unwrap();

    let mut cmd = mp3ify_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains(":9090"))
        .stdout(predicate::str::contains("unbounded"));
}

#[test]
fn test_cli_validate_rejects_args_without_source() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[converter]
args = ["--version"]
"#,
    )
    .unwrap();

    let mut cmd = mp3ify_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("{source}"));
}

#[test]
fn test_cli_check_tools_reports_missing_converter() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        "[converter]\nprogram = \"nonexistent_converter_xyz_12345\"\n",
    )
    .unwrap();

    let mut cmd = mp3ify_cmd();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("nonexistent_converter_xyz_12345"))
        .stdout(predicate::str::contains("missing"));
}

#[test]
fn test_cli_list_without_database() {
    let dir = tempdir().unwrap();
    let config_path = write_sh_config(dir.path(), "true");

    let mut cmd = mp3ify_cmd();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No jobs yet"));
}

#[cfg(unix)]
#[test]
fn test_cli_convert_saves_named_file() {
    let dir = tempdir().unwrap();
    let config_path = write_sh_config(
        dir.path(),
        "echo \"fetching $1\"; printf audio > \"$1.mp3\"",
    );

    let mut cmd = mp3ify_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config_path)
        .arg("convert")
        .arg("My Song")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetching My Song"))
        .stdout(predicate::str::contains("Saved My Song.mp3"));

    assert_eq!(fs::read(dir.path().join("My Song.mp3")).unwrap(), b"audio");
}

#[cfg(unix)]
#[test]
fn test_cli_convert_failure_exits_nonzero() {
    let dir = tempdir().unwrap();
    let config_path = write_sh_config(dir.path(), "echo 'ERROR: no such video' >&2; exit 1");

    let mut cmd = mp3ify_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config_path)
        .arg("convert")
        .arg("missing")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ERROR: no such video"));
}

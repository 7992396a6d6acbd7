use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use std::process::{Command, Output};

// Integration tests for the release-mirror binary
// These run the built executable and only cover paths that need no network

fn run(args: &[&str], home: &TempDir) -> Output {
    Command::new(env!("CARGO_BIN_EXE_release-mirror"))
        .args(args)
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    let output = run(&["--help"], &home);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    for flag in ["--config", "--dry-run", "--repo", "--base-dir", "--proxy", "--token", "--gitlab-token", "--estimate"] {
        assert!(stdout.contains(flag), "help is missing {}", flag);
    }
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    let output = run(&["--version"], &home);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("release-mirror"));
}

#[test]
fn test_no_configuration_fails() {
    let home = TempDir::new().unwrap();
    let output = run(&[], &home);

    assert_eq!(output.status.code(), Some(1));
    assert!(predicate::str::contains("no configuration found").eval(&stderr(&output)));
}

#[test]
fn test_repo_requires_base_dir() {
    let home = TempDir::new().unwrap();
    let output = run(&["--repo", "owner/repo"], &home);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("--repo requires --base-dir"));
}

#[test]
fn test_invalid_yaml_fails() {
    let home = TempDir::new().unwrap();
    let config = home.child("config.yml");
    config.write_str("base_dir: [unterminated\n").unwrap();

    let output = run(&["--config", config.path().to_str().unwrap()], &home);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("failed to parse config file"));
}

#[test]
fn test_unsupported_config_extension_fails() {
    let home = TempDir::new().unwrap();
    let config = home.child("config.ini");
    config.write_str("base_dir = /tmp\n").unwrap();

    let output = run(&["-c", config.path().to_str().unwrap()], &home);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unsupported config format"));
}

#[test]
fn test_empty_url_list_is_a_no_op() {
    let home = TempDir::new().unwrap();
    let base = home.child("mirror");
    let config = home.child("config.yml");
    config
        .write_str(&format!("base_dir: {}\nurls: []\n", base.path().display()))
        .unwrap();

    let output = run(&["--config", config.path().to_str().unwrap()], &home);

    assert!(output.status.success());
    assert!(stderr(&output).contains("no urls configured"));
    base.assert(predicate::path::missing());
}

#[test]
fn test_unresolvable_repo_reports_error() {
    let home = TempDir::new().unwrap();
    let base = home.child("mirror");

    let output = run(
        &[
            "--repo",
            "https://bitbucket.org/someone/thing",
            "--base-dir",
            base.path().to_str().unwrap(),
        ],
        &home,
    );

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Errors:          1"));
    assert!(stdout.contains("unknown host: bitbucket.org"));
    base.assert(predicate::path::missing());
}

#[test]
fn test_default_config_location_is_used() {
    let home = TempDir::new().unwrap();
    let config = home.child("config/release-mirror/config.yml");
    config.write_str("base_dir: /tmp/mirror\nurls: []\n").unwrap();

    let output = run(&[], &home);

    // Found and parsed, with nothing to mirror
    assert!(output.status.success());
    assert!(stderr(&output).contains("no urls configured"));
}

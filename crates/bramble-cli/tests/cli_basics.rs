//! Integration tests for the bramble CLI surface.
//!
//! These cover argument handling and offline failure modes; installs
//! that hit a registry are exercised in bramble-core's pipeline tests.

use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn bramble() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "bramble-cli", "--bin", "bramble", "--quiet", "--"]);
    cmd
}

fn create_package_json(dir: &std::path::Path, name: &str) {
    fs::write(
        dir.join("package.json"),
        format!(r#"{{"name": "{name}", "version": "1.0.0", "dependencies": {{}}}}"#),
    )
    .unwrap();
}

#[test]
fn test_list_empty_project() {
    let dir = tempdir().unwrap();
    create_package_json(dir.path(), "empty-project");

    let output = bramble()
        .args(["list", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("failed to run bramble list");

    assert!(output.status.success(), "list should succeed on an empty project");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(empty)"), "stdout: {stdout}");
}

#[test]
fn test_ci_fails_without_lockfile() {
    let dir = tempdir().unwrap();
    create_package_json(dir.path(), "no-lock");

    let output = bramble()
        .args(["ci", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("failed to run bramble ci");

    assert!(!output.status.success(), "ci must fail without a lockfile");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("LOCKFILE_ERROR"), "stderr: {stderr}");
}

#[test]
fn test_add_rejects_malformed_spec() {
    let dir = tempdir().unwrap();
    create_package_json(dir.path(), "bad-spec");

    let output = bramble()
        .args(["add", "react@", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("failed to run bramble add");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SPEC_INVALID"), "stderr: {stderr}");
}

#[test]
fn test_unknown_subcommand_fails() {
    let output = bramble()
        .arg("frobnicate")
        .output()
        .expect("failed to run bramble");
    assert!(!output.status.success());
}

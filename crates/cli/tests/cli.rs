//! Black-box tests for the `provision` binary surface.

use assert_cmd::Command;
use predicates::prelude::*;

fn provision() -> Command {
    Command::cargo_bin("provision").expect("binary builds")
}

#[test]
fn test_help_lists_subcommands() {
    provision()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("package"))
        .stdout(predicate::str::contains("record"));
}

#[test]
fn test_package_lookup_failure_is_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    provision()
        .args(["package", "refresh", "--root"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no app package found"));
}

#[test]
fn test_package_lookup_prints_path() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("dist")).unwrap();
    std::fs::write(dir.path().join("dist/refresh-appPackage.zip"), b"zip").unwrap();

    provision()
        .args(["package", "refresh", "--root"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("refresh-appPackage.zip"));
}

#[test]
fn test_record_for_unknown_target_fails() {
    let dir = tempfile::tempdir().unwrap();
    provision()
        .args(["record", "refresh", "--state-dir"])
        .arg(dir.path())
        .assert()
        .failure();
}

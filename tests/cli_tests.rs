//! Invocation surface: usage errors, exit status mirroring, spawn failures

use predicates::prelude::*;

#[test]
fn test_cli_requires_command() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("2")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_without_arguments_prints_usage() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("DELAY_FACTOR"));
}

#[test]
fn test_cli_help() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("TIME_FACTOR"));
}

#[test]
fn test_cli_rejects_non_positive_factor() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("0")
        .arg("1")
        .arg("true")
        .assert()
        .failure()
        .stderr(predicate::str::contains("positive"));
}

#[test]
fn test_cli_rejects_unparseable_factor() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("1")
        .arg("fast")
        .arg("true")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a number"));
}

#[test]
fn test_exit_code_preserved() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("--no-preload")
        .arg("1")
        .arg("1")
        .arg("sh")
        .arg("-c")
        .arg("exit 42")
        .assert()
        .code(42);
}

#[test]
fn test_target_output_passes_through() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("--no-preload")
        .arg("2")
        .arg("2")
        .arg("echo")
        .arg("Hello")
        .assert()
        .success()
        .stdout("Hello\n");
}

#[test]
fn test_exec_failure_is_reported() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("--no-preload")
        .arg("1")
        .arg("1")
        .arg("/nonexistent/tardis-target")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to exec"));
}

#[test]
fn test_missing_preload_shim_still_runs_target() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    cmd.arg("--preload")
        .arg("/nonexistent/novdso.so")
        .arg("1")
        .arg("1")
        .arg("true")
        .assert()
        .success()
        .stderr(predicate::str::contains("not found"));
}

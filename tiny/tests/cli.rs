//! End-to-end tests of the `tiny` script runner binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn script(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".tiny")
        .tempfile()
        .expect("create temp script");
    file.write_all(contents.as_bytes()).expect("write script");
    file
}

fn tiny() -> Command {
    Command::cargo_bin("tiny").expect("tiny binary built")
}

#[test]
fn test_runs_script_and_prints() {
    let file = script(
        "func add(a: int, b: int): int { return a + b }\n\
         print(add(1, 2))\n",
    );

    tiny()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));
}

#[test]
fn test_prints_mixed_values() {
    let file = script("print(1, \"two\", true, 'c', 1.5)\n");

    tiny()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 two true c 1.5"));
}

#[test]
fn test_loop_output() {
    let file = script("for i := 0; i < 3; i = i + 1 { print(i) }\n");

    tiny()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0\n1\n2\n"));
}

#[test]
fn test_missing_file_fails() {
    tiny()
        .arg("no_such_script.tiny")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_compile_error_reported() {
    let file = script("x := missing_variable\n");

    tiny()
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to compile"));
}

#[test]
fn test_runtime_error_reported() {
    let file = script("x := 1 / 0\n");

    tiny()
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("division by zero"));
}

#[test]
fn test_no_arguments_shows_usage() {
    tiny()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("usage"));
}

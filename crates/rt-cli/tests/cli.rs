#![allow(deprecated)] // Command::cargo_bin – macro replacement not yet stable

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Create a temp directory with a few linked tables.
fn test_tables() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("monsters.csv"),
        "# hit points are fixed\nname,hp\nOrc,7\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("encounter.csv"),
        "#!include(monsters.csv) as mob\nwhat,count\n${mob}:${~[hp]},${1d1+1}\n",
    )
    .unwrap();
    fs::write(dir.path().join("names.csv"), "name\nAlice\nBob\n").unwrap();
    dir
}

fn roll_table() -> Command {
    let mut cmd = Command::cargo_bin("roll-table").unwrap();
    cmd.env_remove("ROLL_TABLE_LOG");
    cmd
}

#[test]
fn single_field_prints_value_only() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("encounter.csv"))
        .arg("what")
        .assert()
        .success()
        .stdout("Orc:7\n");
}

#[test]
fn all_user_fields_by_default() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("encounter.csv"))
        .assert()
        .success()
        .stdout(" what: Orc:7\ncount: 2\n\n");
}

#[test]
fn repeat_rolls() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("encounter.csv"))
        .args(["count", "-n", "3"])
        .assert()
        .success()
        .stdout("2\n2\n2\n");
}

#[test]
fn markdown_output() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("monsters.csv"))
        .arg("-m")
        .assert()
        .success()
        .stdout("| name | hp  |\n| ---- | --- |\n| Orc  | 7   |\n");
}

#[test]
fn histogram_output() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("encounter.csv"))
        .args(["count", "-g", "-n", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Field: count"))
        .stdout(predicate::str::contains("* = 1"))
        .stdout(predicate::str::contains("  2: ****"));
}

#[test]
fn json_output() {
    let dir = test_tables();
    let output = roll_table()
        .arg(dir.path().join("names.csv"))
        .args(["-j", "-n", "2", "--seed", "5"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert!(rows[0]["name"] == "Alice" || rows[0]["name"] == "Bob");
}

#[test]
fn same_seed_same_output() {
    let dir = test_tables();
    let run = || {
        roll_table()
            .arg(dir.path().join("names.csv"))
            .args(["-n", "10", "--seed", "42"])
            .output()
            .unwrap()
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn unknown_field_fails() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("names.csv"))
        .arg("rank")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("InvalidFieldError"))
        .stderr(predicate::str::contains("does not have the following fields: rank"));
}

#[test]
fn missing_file_fails() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("nope.csv"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("FileReadError"));
}

#[test]
fn output_modes_are_exclusive() {
    let dir = test_tables();
    roll_table()
        .arg(dir.path().join("names.csv"))
        .args(["-c", "-g"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn warnings_go_to_stderr() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.csv"), "text\n${nowhere}\n").unwrap();
    roll_table()
        .arg(dir.path().join("bad.csv"))
        .assert()
        .success()
        .stdout("${nowhere}\n")
        .stderr(predicate::str::contains("unknown alias 'nowhere'"));
}

#[test]
fn warning_names_its_location_once() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.csv"), "text
${nowhere}
").unwrap();
    let output = roll_table().arg(dir.path().join("bad.csv")).output().unwrap();
    assert!(output.status.success());

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("bad.csv:2: while parsing expression '${nowhere}'"), "{stderr}");
    assert_eq!(stderr.matches("bad.csv").count(), 1, "{stderr}");
}

#[test]
fn log_level_error_silences_warnings() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.csv"), "text\n${nowhere}\n").unwrap();
    roll_table()
        .arg(dir.path().join("bad.csv"))
        .args(["--log", "error"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}

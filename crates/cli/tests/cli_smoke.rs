use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn print_config_emits_json_with_default_port() {
    let mut cmd = Command::cargo_bin("revenant").unwrap();
    cmd.arg("print-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"port\": 8765"));
}

#[test]
fn print_config_honors_custom_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revenant.toml");
    std::fs::write(&path, "[transport]\nport = 9999\n").unwrap();

    let mut cmd = Command::cargo_bin("revenant").unwrap();
    cmd.arg("--config")
        .arg(&path)
        .arg("print-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"port\": 9999"));
}

#[test]
fn missing_config_file_is_an_error() {
    let mut cmd = Command::cargo_bin("revenant").unwrap();
    cmd.arg("--config")
        .arg("/nonexistent/revenant.toml")
        .arg("print-config")
        .assert()
        .failure();
}

#[test]
fn help_lists_serve_and_print_config_subcommands() {
    let mut cmd = Command::cargo_bin("revenant").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("print-config"));
}

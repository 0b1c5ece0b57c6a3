use crate::common::*;
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn validate_accepts_a_good_config() {
    let project = TestProject::new(
        r#"
        [project]
        name = "kits"

        [services.web]
        command = "npm run dev"
        port = 3020
    "#,
    );

    Command::cargo_bin("devcycle")
        .unwrap()
        .args(["validate", "-f", project.config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (1 services, 1 enabled)"));
}

#[test]
fn validate_reports_duplicate_ports() {
    let project = TestProject::new(
        r#"
        [project]
        name = "kits"

        [services.web]
        command = "npm run dev"
        port = 3020

        [services.auth]
        command = "npm run dev"
        port = 3020
    "#,
    );

    Command::cargo_bin("devcycle")
        .unwrap()
        .args(["validate", "-f", project.config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("devcycle::duplicate_port"));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("devcycle")
        .unwrap()
        .args(["validate", "-f", dir.path().join("nope.toml").to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn init_writes_a_config_that_validates() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("package.json"), "{}").unwrap();

    Command::cargo_bin("devcycle")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created devcycle.toml"));

    Command::cargo_bin("devcycle")
        .unwrap()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .success();

    Command::cargo_bin("devcycle")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[cfg(unix)]
#[test]
fn doctor_lists_tool_versions() {
    let project = TestProject::new(
        r#"
        [project]
        name = "kits"

        [services.web]
        command = "true"
        port = 3020

        [setup]
        toolchain = ["echo v20.11.0"]
    "#,
    );

    Command::cargo_bin("devcycle")
        .unwrap()
        .args(["doctor", "-f", project.config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("v20.11.0"));
}

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ccsupport() -> Command {
    let mut cmd = Command::cargo_bin("ccsupport").expect("binary built");
    cmd.env_remove("CCSUPPORT_CONFIG");
    cmd.env_remove("CCSUPPORT_LOG_LEVEL");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("ccsupport.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn test_check_config_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
listen: 127.0.0.1:7100
definitions:
  - name: mycc
    version: v1
"#,
    );

    ccsupport()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("listen: 127.0.0.1:7100"))
        .stdout(predicate::str::contains("startup_timeout_ms: 300000"))
        .stdout(predicate::str::contains("name: mycc"));
}

#[test]
fn test_check_config_rejects_zero_timeout() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "support:\n  execute_timeout_ms: 0\n");

    ccsupport()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("execute_timeout_ms"));
}

#[test]
fn test_missing_config_file_fails() {
    ccsupport()
        .args(["--config", "/nonexistent/ccsupport.yaml", "check-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config"));
}

#[test]
fn test_launch_undefined_chaincode_fails() {
    ccsupport()
        .args(["launch", "nope", "v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not defined"));
}

#[test]
fn test_help_describes_serve_as_development_mode() {
    ccsupport()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("user-started chaincodes"));
}

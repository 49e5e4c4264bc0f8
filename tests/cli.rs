// ABOUTME: Integration tests for the kahua CLI commands.
// ABOUTME: Validates --help output, init scaffolding, check, and status.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn kahua_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("kahua"))
}

#[test]
fn help_shows_commands() {
    kahua_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("acquire"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("kahua.yml");

    kahua_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .success();

    assert!(config_path.exists(), "kahua.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("kind: ssh"));
    assert!(content.contains("registration_url:"));
}

#[test]
fn init_scaffolds_batch_kinds() {
    let temp_dir = tempfile::tempdir().unwrap();

    kahua_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--kind", "pbs"])
        .assert()
        .success();

    let content = fs::read_to_string(temp_dir.path().join("kahua.yml")).unwrap();
    assert!(content.contains("kind: pbs"));
    assert!(content.contains("max_nodes:"));
}

#[test]
fn init_rejects_unknown_kind() {
    let temp_dir = tempfile::tempdir().unwrap();

    kahua_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--kind", "kubernetes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot scaffold"));

    assert!(!temp_dir.path().join("kahua.yml").exists());
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("kahua.yml");

    fs::write(&config_path, "existing: config").unwrap();

    kahua_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    kahua_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn check_accepts_scaffolded_config() {
    let temp_dir = tempfile::tempdir().unwrap();

    kahua_cmd()
        .arg("-C")
        .arg(temp_dir.path())
        .args(["init", "--kind", "local"])
        .assert()
        .success();

    kahua_cmd()
        .arg("-C")
        .arg(temp_dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("local source 'default'"));
}

#[test]
fn check_without_config_fails() {
    let temp_dir = tempfile::tempdir().unwrap();

    kahua_cmd()
        .current_dir(temp_dir.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn status_requires_recovery() {
    let temp_dir = tempfile::tempdir().unwrap();

    kahua_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--kind", "local"])
        .assert()
        .success();

    kahua_cmd()
        .current_dir(temp_dir.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("recovery.enabled"));
}

#[test]
fn status_without_snapshot_reports_no_nodes() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(
        temp_dir.path().join("kahua.yml"),
        r#"source: rack1
registration_url: pnp://manager:64738
recovery:
  enabled: true
  state_dir: state
infrastructure:
  kind: local
  command: "start-node --name {node} --url {url}"
"#,
    )
    .unwrap();

    let assert = kahua_cmd()
        .arg("-C")
        .arg(temp_dir.path())
        .args(["--json", "status"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(report["source"], "rack1");
    assert_eq!(report["kind"], "local");
    assert_eq!(report["counts"]["acquired"], 0);
    assert_eq!(report["counts"]["deploying"], 0);
    assert_eq!(report["counts"]["lost"], 0);
    assert!(report.get("written_at").is_none());
}

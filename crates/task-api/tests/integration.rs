use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn task_api(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("task-api").unwrap();
    cmd.current_dir(dir.path()).env_remove("TASK_API_CONFIG");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) {
    std::fs::write(dir.path().join("task-api.yaml"), yaml).unwrap();
}

const VALID: &str = r#"
port: 8889
auth-enabled: true
actions: |
  - name: restart
    cmd: systemctl restart foo
  - name: backup
    cmd: /usr/local/bin/backup --full
    timeout-secs: 600
tokens: |
  abc123: alice
"#;

// ---------------------------------------------------------------------------
// task-api check
// ---------------------------------------------------------------------------

#[test]
fn check_lists_actions() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, VALID);

    task_api(&dir)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("restart"))
        .stdout(predicate::str::contains("systemctl restart foo"))
        .stdout(predicate::str::contains("600s"))
        .stdout(predicate::str::contains("users: alice"))
        .stdout(predicate::str::contains("abc123").not());
}

#[test]
fn check_json_output() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, VALID);

    let output = task_api(&dir).args(["check", "--json"]).output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["port"], 8889);
    assert_eq!(json["auth_enabled"], true);
    assert_eq!(json["tokens"], 1);
    let names: Vec<&str> = json["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["backup", "restart"]);
    assert_eq!(json["actions"][1]["timeout_secs"], 60);
}

#[test]
fn check_honours_config_flag_and_env() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("elsewhere.yaml");
    std::fs::write(&path, VALID).unwrap();

    task_api(&dir)
        .args(["check", "--config"])
        .arg(&path)
        .assert()
        .success();

    task_api(&dir)
        .arg("check")
        .env("TASK_API_CONFIG", &path)
        .assert()
        .success();
}

#[test]
fn check_warns_but_passes_on_auth_without_tokens() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "auth-enabled: true\nactions: \"- {name: a, cmd: 'true'}\"\n",
    );

    task_api(&dir)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning]"));
}

#[test]
fn check_fails_on_duplicate_action() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "actions: |\n  - name: a\n    cmd: 'true'\n  - name: a\n    cmd: 'false'\n",
    );

    task_api(&dir)
        .arg("check")
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] duplicate action name: a"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn check_fails_on_malformed_tokens() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "tokens: |\n  abc123 alice\n");

    task_api(&dir)
        .arg("check")
        .assert()
        .failure()
        .stdout(predicate::str::contains("malformed token entry on line 1"));
}

#[test]
fn check_fails_when_config_missing() {
    let dir = TempDir::new().unwrap();

    task_api(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

// ---------------------------------------------------------------------------
// task-api serve
// ---------------------------------------------------------------------------

#[test]
fn serve_refuses_invalid_initial_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "actions: \"- {name: 'bad name', cmd: x}\"\n");

    task_api(&dir)
        .args(["serve", "--port", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn serve_refuses_missing_config() {
    let dir = TempDir::new().unwrap();

    task_api(&dir)
        .args(["serve", "--port", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

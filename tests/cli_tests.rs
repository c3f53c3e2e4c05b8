#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn dash(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dash-sessions").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--config")
        .arg(temp_dir.path().join("missing.json"))
        .arg("--storage-dir")
        .arg(temp_dir.path().join("sessions"));
    cmd
}

#[test]
fn test_version_command() {
    Command::cargo_bin("dash-sessions")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "dash-sessions {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("dash-sessions")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_command_exits_one() {
    Command::cargo_bin("dash-sessions")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown command: frobnicate"));
}

#[test]
fn test_invalid_session_id() {
    let temp_dir = TempDir::new().unwrap();

    dash(&temp_dir)
        .args(["chat", "--session", "not-a-uuid", "hello"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid session ID: not-a-uuid"));
}

#[test]
fn test_one_shot_chat() {
    let temp_dir = TempDir::new().unwrap();

    dash(&temp_dir)
        .args(["chat", "--no-persist", "how", "many", "races"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[turn 1] how many races"));

    assert!(!temp_dir.path().join("sessions").exists());
}

#[test]
fn test_interactive_chat_prints_session_and_resume_hint() {
    let temp_dir = TempDir::new().unwrap();

    dash(&temp_dir)
        .arg("chat")
        .write_stdin("hello\n\nagain\nquit\n")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Session: ")
                .and(predicate::str::contains("[turn 1] hello"))
                .and(predicate::str::contains("[turn 2] again"))
                .and(predicate::str::contains("chat --session")),
        );

    let transcripts = std::fs::read_dir(temp_dir.path().join("sessions"))
        .unwrap()
        .count();
    assert_eq!(transcripts, 1);
}

#[test]
fn test_gateway_answers_until_end_of_input() {
    let temp_dir = TempDir::new().unwrap();

    let output = dash(&temp_dir)
        .arg("gateway")
        .write_stdin(concat!(
            "{\"op\":\"create_session\",\"request_id\":1}\n",
            "{\"op\":\"status\",\"id\":\"bogus\",\"request_id\":2}\n",
        ))
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let responses: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(responses.len(), 2);

    let created = responses.iter().find(|r| r["request_id"] == 1).unwrap();
    assert_eq!(created["ok"], true);

    let rejected = responses.iter().find(|r| r["request_id"] == 2).unwrap();
    assert_eq!(rejected["error"]["code"], "invalid_argument");
}

#[test]
fn test_verbose_flag_enables_debug_logging() {
    // DEBUG logs go to stderr, the version string to stdout
    Command::cargo_bin("dash-sessions")
        .unwrap()
        .args(["-v", "version"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dash-sessions"))
        .stdout(predicate::str::contains("DEBUG").not())
        .stderr(predicate::str::contains("DEBUG"));
}

#[test]
fn test_default_mode_hides_debug_logs() {
    Command::cargo_bin("dash-sessions")
        .unwrap()
        .env_remove("RUST_LOG")
        .arg("version")
        .assert()
        .success()
        .stderr(predicate::str::contains("DEBUG").not());
}

//! Exit-code checks against the compiled binary. None of these reach the
//! point where the `task` binary would be invoked.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn relay_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("capture-relay");
    path
}

fn write_config(tmp: &TempDir, extra: &str) -> PathBuf {
    let root = tmp.path();
    let content = format!(
        r#"[vault]
root = "{root}"
capture_dir = "capture"

[state]
dir = "{root}/state"

[consumers.archive]
type = "taskwarrior"
enabled = false

{extra}
"#,
        root = root.display(),
    );
    let path = root.join("automations.toml");
    fs::write(&path, content).unwrap();
    path
}

fn run_relay(config: &Path, args: &[&str]) -> (String, String, i32) {
    let binary = relay_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run capture-relay at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code().unwrap_or(-1))
}

#[test]
fn test_list_consumers_prints_enabled_names() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(&tmp, "");

    let (stdout, _, code) = run_relay(&config, &["--list-consumers"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["taskwarrior"]);
    assert!(tmp.path().join("state").join("backups").is_dir());
}

#[test]
fn test_list_consumers_rejects_unknown_type() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(&tmp, "[consumers.pigeon]\ntype = \"carrier\"\n");

    let (stdout, stderr, code) = run_relay(&config, &["--list-consumers"]);
    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    assert!(stderr.contains("unknown consumer type 'carrier'"), "stderr: {}", stderr);
}

#[test]
fn test_unmatched_filter_exits_two() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(&tmp, "");

    let (_, stderr, code) = run_relay(&config, &["--consumer", "nothing-here"]);
    assert_eq!(code, 2);
    assert!(stderr.contains("no matching consumers"), "stderr: {}", stderr);
}

#[test]
fn test_missing_capture_dir_exits_one() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(&tmp, "");

    let (_, stderr, code) = run_relay(&config, &["--log-level", "warning"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("capture directory not found"), "stderr: {}", stderr);
    assert!(!tmp.path().join("state").join("automations.db").exists());
}

#[test]
fn test_malformed_config_exits_one() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("broken.toml");
    fs::write(&config, "[vault\nroot = ").unwrap();

    let (_, stderr, code) = run_relay(&config, &[]);
    assert_eq!(code, 1);
    assert!(stderr.contains("failed to parse config file"), "stderr: {}", stderr);
}

//! CLI conformance tests — golden-ish checks for help output and exit codes.
//!
//! These exercise the built `epiloop` binary directly (not `cargo run`)
//! so they don't race a debug rebuild against other integration tests.

use std::process::Command;

fn run(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_epiloop"))
        .args(args)
        .env("EPILOOP_DISABLE_BONJOUR", "1")
        .output()
        .expect("failed to execute epiloop binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);
    (stdout, stderr, code)
}

#[test]
fn help_exits_zero_and_lists_subcommands() {
    let (stdout, _stderr, code) = run(&["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    for cmd in [
        "gateway", "status", "health", "doctor", "onboard", "models", "channels", "message",
        "agent", "nodes", "node", "approvals", "plugins", "pairing",
    ] {
        assert!(stdout.contains(cmd), "missing subcommand `{cmd}` in help output");
    }
}

#[test]
fn profile_and_dev_are_global_flags() {
    let (stdout, _stderr, code) = run(&["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("--profile"));
    assert!(stdout.contains("--dev"));
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let (_stdout, stderr, code) = run(&["not-a-real-command"]);
    assert_ne!(code, 0);
    assert!(!stderr.is_empty());
}

#[test]
fn doctor_runs_under_an_isolated_profile() {
    let dir = tempfile::tempdir().unwrap();
    let (_stdout, _stderr, code) = Command::new(env!("CARGO_BIN_EXE_epiloop"))
        .args(["doctor"])
        .env("EPILOOP_STATE_DIR", dir.path())
        .env("EPILOOP_DISABLE_BONJOUR", "1")
        .output()
        .map(|o| {
            (
                String::from_utf8_lossy(&o.stdout).to_string(),
                String::from_utf8_lossy(&o.stderr).to_string(),
                o.status.code().unwrap_or(-1),
            )
        })
        .unwrap();
    // doctor is a diagnostic command: loader errors must be non-fatal (spec §4.1).
    assert_eq!(code, 0);
}

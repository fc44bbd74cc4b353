mod common;

use common::{run_avilingo, stderr_of, stdout_of, TestEnv};

#[test]
fn avilingo_help_shows_usage() {
    let output = run_avilingo(&["--help"]);
    let stdout = stdout_of(&output);
    let stderr = stderr_of(&output);

    assert!(
        output.status.success(),
        "--help should succeed\nstdout:\n{}\nstderr:\n{}",
        stdout,
        stderr
    );
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("Commands:"));
    assert!(stdout.contains("record"));
    assert!(
        !stderr.contains("No config file found"),
        "--help should not log config fallback noise\nstderr:\n{}",
        stderr
    );
}

#[test]
fn avilingo_version_shows_version() {
    let output = run_avilingo(&["--version"]);
    let stdout = stdout_of(&output);

    assert!(output.status.success(), "--version should succeed");
    assert!(stdout.contains("avilingo "));
}

#[test]
fn completions_bash_outputs_script() {
    let output = run_avilingo(&["completions", "bash"]);
    let stdout = stdout_of(&output);

    assert!(
        output.status.success(),
        "completions bash should succeed\nstderr:\n{}",
        stderr_of(&output)
    );
    assert!(
        stdout.contains("avilingo"),
        "expected completion output to reference command name\nstdout:\n{}",
        stdout
    );
}

#[test]
fn config_show_works() {
    let output = run_avilingo(&["config", "show"]);
    let stdout = stdout_of(&output);

    assert!(
        output.status.success(),
        "config show should succeed\nstderr:\n{}",
        stderr_of(&output)
    );
    assert!(stdout.contains("[general]"));
    assert!(stdout.contains("[recorder]"));
    assert!(stdout.contains("max_duration_secs = 180"));
    assert!(stdout.contains("poll_interval_ms = 2000"));
}

#[test]
fn config_path_returns_valid_path() {
    let output = run_avilingo(&["config", "path"]);

    assert!(output.status.success(), "config path should succeed");
    assert!(stdout_of(&output).contains("config.toml"));
}

#[test]
fn config_file_values_are_used() {
    let env = TestEnv::new();
    env.write_config("[grading]\npoll_interval_ms = 250\n");

    let output = env.run(&["config", "show"]);
    assert!(output.status.success());
    assert!(stdout_of(&output).contains("poll_interval_ms = 250"));
}

#[test]
fn api_url_comes_from_environment() {
    let env = TestEnv::with_api("http://grading.test/api/v1");
    let output = env.run(&["config", "show"]);

    assert!(output.status.success());
    assert!(stdout_of(&output).contains("http://grading.test/api/v1"));
}

#[test]
fn status_without_session_asks_to_sign_in() {
    let output = run_avilingo(&["status", "abc"]);
    let stderr = stderr_of(&output);

    assert!(!output.status.success(), "status should fail without a session");
    assert!(
        stderr.contains("Please sign in again"),
        "expected a sign-in hint\nstderr:\n{}",
        stderr
    );
}

#[test]
fn submit_rejects_missing_file() {
    let env = TestEnv::new();
    let output = env.run(&["submit", "/nonexistent/take.wav", "--scenario", "42"]);

    assert!(!output.status.success());
}

#[test]
fn record_rejects_zero_cap() {
    let output = run_avilingo(&["record", "--scenario", "42", "--max-secs", "0"]);
    let stderr = stderr_of(&output);

    assert!(!output.status.success());
    assert!(stderr.contains("greater than zero"), "stderr:\n{}", stderr);
}

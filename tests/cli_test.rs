//! CLI surface tests against the built binary.
//!
//! Tests:
//! - --help lists the configuration flags
//! - --version reports the service version

use std::process::Command;

const BINARY: &str = env!("CARGO_BIN_EXE_dm-nkp-gitops-custom-app");

#[test]
fn test_cli_help_output() {
    let output = Command::new(BINARY)
        .arg("--help")
        .output()
        .expect("failed to run");

    let stdout = String::from_utf8_lossy(&output.stdout);

    for flag in [
        "--port",
        "--metrics-port",
        "--service-name",
        "--otel-endpoint",
        "--metrics-backend",
        "--log-level",
    ] {
        assert!(stdout.contains(flag), "help should mention {flag}: {stdout}");
    }
    assert!(
        stdout.contains("OTEL_EXPORTER_OTLP_ENDPOINT"),
        "help should name the environment variables"
    );
}

#[test]
fn test_cli_version_output() {
    let output = Command::new(BINARY)
        .arg("--version")
        .output()
        .expect("failed to run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("0.1.0"),
        "version output should contain version number: {stdout}"
    );
}

#[test]
fn test_invalid_port_exits_non_zero() {
    let output = Command::new(BINARY)
        .args(["--port", "not-a-port"])
        .env("OTEL_LOGS_ENABLED", "false")
        .output()
        .expect("failed to run");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid value"));
}

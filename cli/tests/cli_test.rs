use assert_cmd::Command;

fn rfstack() -> Command {
    let mut cmd = Command::cargo_bin("rfstack").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn help_lists_every_subcommand() {
    let output = rfstack().arg("--help").output().unwrap();
    assert!(output.status.success());
    let help = stdout(&output);
    for subcommand in ["install", "uninstall", "status", "deploy-rapidfort", "help"] {
        assert!(help.contains(subcommand), "missing '{}' in\n{}", subcommand, help);
    }
    assert!(help.contains("--cluster"));
    assert!(help.contains("--log-level"));
}

#[test]
fn deploy_rapidfort_help() {
    let output = rfstack()
        .args(["deploy-rapidfort", "--help"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let help = stdout(&output);
    assert!(help.contains("--local-registry"));
    assert!(help.contains("--image-tag"));
    assert!(help.contains("--registry-ip"));
}

#[test]
fn install_help() {
    let output = rfstack().args(["install", "--help"]).output().unwrap();
    assert!(output.status.success());
    let help = stdout(&output);
    assert!(help.contains("--registry-ip"));
    assert!(help.contains("--version"));
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    let output = rfstack().output().unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("USAGE"));
}

#[test]
fn unknown_cluster_kind_is_rejected() {
    let output = rfstack()
        .args(["--cluster", "kind", "status"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--cluster"));
}

#[test]
fn invalid_registry_ip_is_rejected() {
    let output = rfstack()
        .args(["install", "--registry-ip", "not-an-ip"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--registry-ip"));
}

#[test]
fn invalid_environment_toggle_fails() {
    let output = rfstack()
        .env("RF_USE_LOCAL_REGISTRY", "maybe")
        .arg("status")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("environment"));
}

#[test]
fn unreadable_config_file_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = rfstack()
        .args(["--config"])
        .arg(dir.path().join("missing.yaml"))
        .arg("status")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("missing.yaml"));
}

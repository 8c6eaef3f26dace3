use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// End-to-end tests that run the startosis binary
const BIN: &str = env!("CARGO_BIN_EXE_startosis");

async fn run_with_stdin(args: &[&str], stdin: &str) -> std::process::Output {
    let mut child = Command::new(BIN)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn startosis");

    let mut pipe = child.stdin.take().expect("stdin is piped");
    // The binary may exit before reading stdin
    let _ = pipe.write_all(stdin.as_bytes()).await;
    drop(pipe);

    child
        .wait_with_output()
        .await
        .expect("Failed to wait for startosis")
}

#[tokio::test]
async fn test_cli_help_works() {
    let output = Command::new(BIN).arg("--help").output().await.unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("clean-cache"));
}

#[tokio::test]
async fn test_cli_version_works() {
    let output = Command::new(BIN).arg("--version").output().await.unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("startosis"));
}

#[tokio::test]
async fn test_dry_run_script_from_stdin() {
    let script = r#"
print("hello from stdin")
add_service(service_id = "web", service_config = struct(container_image_name = "nginx"))
"#;
    let output = run_with_stdin(&["--backend", "mock", "--dry-run", "run", "-"], script).await;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# from: startosis_script[3:12]\nadd_service("));
    assert!(stdout.contains("hello from stdin"));
    assert!(stdout.contains("--- 1 instructions planned ---"));
}

#[tokio::test]
async fn test_json_report_for_failing_script() {
    let output = run_with_stdin(
        &["--backend", "mock", "--json", "run", "-"],
        "undefined_thing()\n",
    )
    .await;

    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["error"]["kind"], "interpretation");
    assert_eq!(
        report["error"]["frames"][0]["description"],
        "undefined: undefined_thing"
    );
}

#[tokio::test]
async fn test_unknown_backend_is_rejected() {
    let output = run_with_stdin(&["--backend", "podman", "run", "-"], "print(1)\n").await;

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown backend"));
}

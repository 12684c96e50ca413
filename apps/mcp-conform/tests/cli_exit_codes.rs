#![cfg(unix)]

mod support;

use std::process::{Command, Output};

use support::{CallBehavior, PluginFixture};

fn probe(fixture: &PluginFixture) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mcp-conform"))
        .arg(fixture.target.path())
        .args(["--skip-build", "--plugin-grace-ms", "100", "--response-timeout-secs", "5"])
        .arg("--plugin-host")
        .arg(&fixture.host)
        .env_remove("MCP_CONFORM_LOG_FILTER")
        .output()
        .unwrap()
}

#[test_timeout::timeout(30)]
fn passing_candidate_exits_zero() {
    let fixture = PluginFixture::new(CallBehavior::Deny);
    let output = probe(&fixture);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "{stderr}");
    assert!(stderr.contains("[STEP 1] initialize"), "{stderr}");
    assert!(stderr.contains("=== PASS: sandboxed-plugin"), "{stderr}");
    assert!(output.stdout.is_empty());
}

#[test_timeout::timeout(30)]
fn failing_candidate_exits_non_zero() {
    let fixture = PluginFixture::new(CallBehavior::Accept);
    let output = probe(&fixture);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1), "{stderr}");
    assert!(stderr.contains("❌ unexpected outcome"), "{stderr}");
}

#[test_timeout::timeout(30)]
fn broken_manifest_is_a_build_failure() {
    let target = tempfile::TempDir::new().unwrap();
    std::fs::write(target.path().join("Cargo.toml"), "[package\nname = ").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_mcp-conform"))
        .arg(target.path())
        .args(["--build-timeout-secs", "20"])
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1), "{stderr}");
    assert!(stderr.contains("❌ build failed"), "{stderr}");
    assert!(!stderr.contains("[STEP 1]"), "{stderr}");
}

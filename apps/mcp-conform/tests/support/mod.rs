//! Candidate fixtures backed by shell scripts posing as a plugin host.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use mcp_conform::HarnessConfig;
use tempfile::TempDir;

pub const PLUGIN_MANIFEST: &str = r#"[package]
name = "poc-hyper-mcp"
version = "0.1.0"
edition = "2021"

[lib]
crate-type = ["cdylib"]
"#;

const HOST_PRELUDE: &str = r#"#!/bin/sh
echo "host: loading plugins from $2" >&2
echo "INFO registering plugin poc_hyper_mcp"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-host","version":"1.0.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      echo "DEBUG listing tools"
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"poc_hyper_mcp-write_file","inputSchema":{"type":"object","properties":{"path":{"type":"string"},"content":{"type":"string"}}}}]}}\n' "$id" ;;
"#;

const HOST_EPILOGUE: &str = r#"  esac
done
"#;

/// How the fake host answers `tools/call`.
pub enum CallBehavior {
    Deny,
    Accept,
    Hang,
}

pub struct PluginFixture {
    pub target: TempDir,
    pub host: PathBuf,
}

impl PluginFixture {
    pub fn new(behavior: CallBehavior) -> Self {
        let target = TempDir::new().unwrap();
        fs::write(target.path().join("Cargo.toml"), PLUGIN_MANIFEST).unwrap();
        fs::write(
            target.path().join("config.json"),
            r#"{"plugins":[{"name":"poc_hyper_mcp","path":"target/wasm32-wasip1/release/poc_hyper_mcp.wasm"}]}"#,
        )
        .unwrap();

        let call_arm = match behavior {
            CallBehavior::Deny => {
                r#"    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32603,"message":"filesystem access denied"}}\n' "$id" ;;
"#
            }
            CallBehavior::Accept => {
                r#"    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"written"}]}}\n' "$id" ;;
"#
            }
            CallBehavior::Hang => {
                r#"    *'"method":"tools/call"'*)
      echo "stuck on write" >&2
      sleep 30 ;;
"#
            }
        };
        let host = target.path().join("fake-host.sh");
        fs::write(&host, format!("{HOST_PRELUDE}{call_arm}{HOST_EPILOGUE}")).unwrap();
        fs::set_permissions(&host, fs::Permissions::from_mode(0o755)).unwrap();

        Self { target, host }
    }

    pub fn config(&self) -> HarnessConfig {
        HarnessConfig {
            response_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(1),
            plugin_grace: Duration::from_millis(100),
            plugin_host: self.host.display().to_string(),
            skip_build: true,
            ..HarnessConfig::default()
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::channel::DEFAULT_RESPONSE_TIMEOUT;
use crate::config::{
    DEFAULT_BUILD_TIMEOUT, DEFAULT_PLUGIN_GRACE, DEFAULT_PLUGIN_HOST, DEFAULT_TEARDOWN_TIMEOUT,
    HarnessConfig,
};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mcp-conform",
    version,
    about = "Probe a stdio tool server with a fixed handshake and file-write scenario"
)]
pub struct Cli {
    #[arg(value_name = "TARGET_DIR", help = "Directory containing the candidate's Cargo.toml")]
    pub target: PathBuf,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub timeouts: TimeoutArgs,

    #[arg(
        long = "plugin-host",
        env = "MCP_CONFORM_PLUGIN_HOST",
        value_name = "PROGRAM",
        default_value = DEFAULT_PLUGIN_HOST,
        help = "Runtime host used to launch sandboxed plugin candidates"
    )]
    pub plugin_host: String,

    #[arg(
        long = "skip-build",
        env = "MCP_CONFORM_SKIP_BUILD",
        help = "Launch the candidate without building it first"
    )]
    pub skip_build: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "MCP_CONFORM_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "MCP_CONFORM_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TimeoutArgs {
    #[arg(
        long = "response-timeout-secs",
        env = "MCP_CONFORM_RESPONSE_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = DEFAULT_RESPONSE_TIMEOUT.as_secs(),
        help = "How long to wait for each response line"
    )]
    pub response_secs: u64,

    #[arg(
        long = "teardown-timeout-secs",
        env = "MCP_CONFORM_TEARDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = DEFAULT_TEARDOWN_TIMEOUT.as_secs(),
        help = "Grace period after SIGTERM before the candidate is killed"
    )]
    pub teardown_secs: u64,

    #[arg(
        long = "build-timeout-secs",
        env = "MCP_CONFORM_BUILD_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = DEFAULT_BUILD_TIMEOUT.as_secs(),
        help = "Upper bound on the candidate build"
    )]
    pub build_secs: u64,

    #[arg(
        long = "plugin-grace-ms",
        env = "MCP_CONFORM_PLUGIN_GRACE_MS",
        value_name = "MILLIS",
        default_value_t = DEFAULT_PLUGIN_GRACE.as_millis() as u64,
        help = "Delay before the first request to a plugin host"
    )]
    pub plugin_grace_ms: u64,
}

impl Cli {
    pub fn to_config(&self) -> HarnessConfig {
        HarnessConfig {
            response_timeout: Duration::from_secs(self.timeouts.response_secs),
            teardown_timeout: Duration::from_secs(self.timeouts.teardown_secs),
            build_timeout: Duration::from_secs(self.timeouts.build_secs),
            plugin_grace: Duration::from_millis(self.timeouts.plugin_grace_ms),
            plugin_host: self.plugin_host.clone(),
            skip_build: self.skip_build,
            ..HarnessConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test_timeout::timeout]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test_timeout::timeout]
    fn flags_map_onto_harness_config() {
        let cli = Cli::try_parse_from([
            "mcp-conform",
            "poc-hyper-mcp",
            "--response-timeout-secs",
            "5",
            "--plugin-grace-ms",
            "250",
            "--plugin-host",
            "/opt/bin/hyper-mcp",
            "--skip-build",
        ])
        .unwrap();
        let config = cli.to_config();
        assert_eq!(cli.target, PathBuf::from("poc-hyper-mcp"));
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.plugin_grace, Duration::from_millis(250));
        assert_eq!(config.plugin_host, "/opt/bin/hyper-mcp");
        assert!(config.skip_build);
        assert_eq!(config.teardown_timeout, DEFAULT_TEARDOWN_TIMEOUT);
    }

    #[test_timeout::timeout]
    fn target_is_required() {
        assert!(Cli::try_parse_from(["mcp-conform"]).is_err());
    }
}

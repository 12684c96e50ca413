use std::time::Duration;

use mcp_wire::ClientInfo;

use crate::channel::DEFAULT_RESPONSE_TIMEOUT;

pub const DEFAULT_PLUGIN_HOST: &str = "hyper-mcp";
pub const DEFAULT_PLUGIN_GRACE: Duration = Duration::from_millis(2_000);
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Resolved settings for one probe run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Upper bound on each wait for a response line.
    pub response_timeout: Duration,
    /// How long a terminated candidate gets to exit before it is killed.
    pub teardown_timeout: Duration,
    pub build_timeout: Duration,
    /// Delay between launching a plugin host and the first request, while
    /// the host loads and registers plugins.
    pub plugin_grace: Duration,
    pub plugin_host: String,
    pub skip_build: bool,
    pub client: ClientInfo,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            plugin_grace: DEFAULT_PLUGIN_GRACE,
            plugin_host: DEFAULT_PLUGIN_HOST.to_string(),
            skip_build: false,
            client: ClientInfo::new("mcp-conform", env!("CARGO_PKG_VERSION")),
        }
    }
}

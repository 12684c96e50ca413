//! Classifies a candidate directory into an execution mode and derives the
//! per-mode policy the rest of the run consumes.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp_wire::ResponseOutcome;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

pub const MANIFEST_FILE: &str = "Cargo.toml";
pub const PLUGIN_CONFIG_FILE: &str = "config.json";
pub const EXPECTED_TOOL: &str = "write_file";
const PLUGIN_ARTIFACT_MARKER: &str = "cdylib";
const PLUGIN_TARGET: &str = "wasm32-wasip1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Traditional,
    SandboxedPlugin,
    Unknown,
}

impl Variant {
    pub fn label(self) -> &'static str {
        match self {
            Variant::Traditional => "traditional",
            Variant::SandboxedPlugin => "sandboxed-plugin",
            Variant::Unknown => "unknown",
        }
    }

    pub fn policy(self, target: &Path, config: &HarnessConfig) -> Result<VariantPolicy> {
        match self {
            Variant::Traditional => Ok(VariantPolicy {
                variant: self,
                build: CommandSpec::new("cargo", ["build"]),
                launch: CommandSpec::new("cargo", ["run", "--quiet"]),
                filter_non_message_lines: false,
                tool_match: ToolMatch::Exact,
                write_expectation: WriteExpectation::Succeeds,
                startup_grace: Duration::ZERO,
            }),
            Variant::SandboxedPlugin => {
                let plugin_config = target.join(PLUGIN_CONFIG_FILE);
                Ok(VariantPolicy {
                    variant: self,
                    build: CommandSpec::new(
                        "cargo",
                        ["build", "--release", "--target", PLUGIN_TARGET],
                    ),
                    launch: CommandSpec::new(
                        config.plugin_host.as_str(),
                        [
                            "--config-file".to_string(),
                            plugin_config.display().to_string(),
                            "--insecure-skip-signature".to_string(),
                            "true".to_string(),
                        ],
                    ),
                    filter_non_message_lines: true,
                    tool_match: ToolMatch::Contains,
                    write_expectation: WriteExpectation::Rejected,
                    startup_grace: config.plugin_grace,
                })
            }
            Variant::Unknown => Err(HarnessError::UnknownVariant {
                target: target.to_path_buf(),
            }),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A plain substring search over the manifest is enough: the signal is the
/// `cdylib` crate type plus a host configuration next to the manifest.
pub fn classify(target: &Path) -> Result<Variant> {
    let manifest_path = target.join(MANIFEST_FILE);
    let manifest = match fs::read_to_string(&manifest_path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %manifest_path.display(), "no build manifest");
            return Ok(Variant::Unknown);
        }
        Err(err) => return Err(err.into()),
    };

    let has_marker = manifest.contains(PLUGIN_ARTIFACT_MARKER);
    let has_plugin_config = target.join(PLUGIN_CONFIG_FILE).is_file();
    debug!(has_marker, has_plugin_config, "classified manifest");
    if has_marker && has_plugin_config {
        Ok(Variant::SandboxedPlugin)
    } else {
        Ok(Variant::Traditional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMatch {
    Exact,
    /// Plugin hosts prefix tool names with the plugin name.
    Contains,
}

impl ToolMatch {
    pub fn matches(self, name: &str, fragment: &str) -> bool {
        match self {
            ToolMatch::Exact => name == fragment,
            ToolMatch::Contains => name.contains(fragment),
        }
    }

    pub fn describe(self, fragment: &str) -> String {
        match self {
            ToolMatch::Exact => format!("`{fragment}`"),
            ToolMatch::Contains => format!("*{fragment}*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteExpectation {
    Succeeds,
    /// The sandbox has no filesystem access, so the write must come back as an error.
    Rejected,
}

impl WriteExpectation {
    pub fn accepts(self, outcome: &ResponseOutcome<'_>) -> bool {
        matches!(
            (self, outcome),
            (WriteExpectation::Succeeds, ResponseOutcome::Success(_))
                | (WriteExpectation::Rejected, ResponseOutcome::Failure(_))
        )
    }

    pub fn expected_label(self) -> &'static str {
        match self {
            WriteExpectation::Succeeds => "result",
            WriteExpectation::Rejected => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// Everything variant-specific, decided once at classification time.
#[derive(Debug, Clone)]
pub struct VariantPolicy {
    pub variant: Variant,
    pub build: CommandSpec,
    pub launch: CommandSpec,
    pub filter_non_message_lines: bool,
    pub tool_match: ToolMatch,
    pub write_expectation: WriteExpectation,
    pub startup_grace: Duration,
}

impl VariantPolicy {
    pub fn plugin_config(&self, target: &Path) -> Option<PathBuf> {
        (self.variant == Variant::SandboxedPlugin).then(|| target.join(PLUGIN_CONFIG_FILE))
    }
}

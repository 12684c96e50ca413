//! The fixed five-step probe run against every candidate.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mcp_wire::{ClientInfo, JsonRpcResponse, ResponseOutcome, ToolDescriptor, method};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::report::Narrator;
use crate::session::ProtocolSession;
use crate::supervisor::{self, Session};
use crate::variant::{EXPECTED_TOOL, Variant, VariantPolicy, WriteExpectation, classify};

pub const WRITE_CONTENT: &str = "Hello from Python MCP client!";
pub const RELATIVE_PATH: &str = "relative/path.txt";
pub const RELATIVE_CONTENT: &str = "This should fail";

const STEP_ABSOLUTE_WRITE: &str = "tools/call (absolute path)";
const STEP_RELATIVE_WRITE: &str = "tools/call (relative path)";
const STEP_VERIFY: &str = "verify written file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

impl ServerIdentity {
    pub fn describe(&self) -> String {
        format!("{} {}", self.name, self.version)
    }

    fn from_initialize(response: &JsonRpcResponse) -> Result<Self> {
        let info = response
            .result
            .as_ref()
            .and_then(|result| result.get("serverInfo"))
            .ok_or_else(|| {
                HarnessError::violation(method::INITIALIZE, "result does not carry `serverInfo`")
            })?;
        let field = |key: &str| {
            info.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    HarnessError::violation(
                        method::INITIALIZE,
                        format!("`serverInfo.{key}` is missing or not a string"),
                    )
                })
        };
        Ok(Self {
            name: field("name")?,
            version: field("version")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub number: u8,
    pub title: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub variant: Variant,
    pub server: ServerIdentity,
    pub tool: ToolDescriptor,
    pub steps: Vec<StepRecord>,
}

pub struct Scenario {
    policy: VariantPolicy,
    scratch: PathBuf,
    client: ClientInfo,
}

impl Scenario {
    pub fn new(policy: VariantPolicy, scratch: impl Into<PathBuf>, client: ClientInfo) -> Self {
        Self {
            policy,
            scratch: scratch.into(),
            client,
        }
    }

    /// Where the valid write is aimed; always inside the scratch area.
    pub fn write_target(&self) -> PathBuf {
        self.scratch.join("nested").join("test.txt")
    }

    /// Runs every step in order and stops at the first unmet assertion.
    pub async fn run<R, W>(
        &self,
        session: &mut ProtocolSession<R, W>,
        narrator: &mut Narrator,
    ) -> Result<ScenarioReport>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut steps = Vec::with_capacity(5);

        narrator.step(1, "initialize");
        let handshake = session.initialize(&self.client).await;
        narrate_exchange(session, narrator);
        let server = ServerIdentity::from_initialize(&handshake?)?;
        narrator.pass(format!("server: {}", server.describe()));
        steps.push(record(1, method::INITIALIZE, server.describe()));

        narrator.step(2, "notifications/initialized");
        session.notify_initialized().await?;
        if let Some(line) = session.channel().last_sent() {
            narrator.sent(line);
        }
        narrator.pass("handshake complete");
        steps.push(record(2, method::INITIALIZED, "sent".to_string()));

        narrator.step(3, "tools/list");
        let listing = session.list_tools().await;
        narrate_exchange(session, narrator);
        let tool = self.find_tool(listing?, narrator)?;
        steps.push(record(3, method::TOOLS_LIST, tool.name.clone()));

        narrator.step(4, "tools/call with an absolute path");
        let target = self.write_target();
        let response = session
            .invoke_tool(&tool.name, write_arguments(&target.display().to_string(), WRITE_CONTENT))
            .await;
        narrate_exchange(session, narrator);
        let detail = self.check_absolute_write(&response?, &target).await?;
        narrator.pass(&detail);
        steps.push(record(4, STEP_ABSOLUTE_WRITE, detail));

        narrator.step(5, "tools/call with a relative path");
        let response = session
            .invoke_tool(&tool.name, write_arguments(RELATIVE_PATH, RELATIVE_CONTENT))
            .await;
        narrate_exchange(session, narrator);
        let response = response?;
        let detail = match response.outcome() {
            Ok(ResponseOutcome::Failure(error)) => format!("rejected: {}", error.message),
            Ok(ResponseOutcome::Success(result)) => {
                return Err(HarnessError::unexpected(
                    STEP_RELATIVE_WRITE,
                    format!("relative path was accepted: {}", compact(result)),
                ));
            }
            Err(shape) => return Err(HarnessError::violation(STEP_RELATIVE_WRITE, shape.to_string())),
        };
        narrator.pass(&detail);
        steps.push(record(5, STEP_RELATIVE_WRITE, detail));

        info!(variant = %self.policy.variant, server = %server.describe(), "scenario passed");
        Ok(ScenarioReport {
            variant: self.policy.variant,
            server,
            tool,
            steps,
        })
    }

    fn find_tool(
        &self,
        tools: Vec<ToolDescriptor>,
        narrator: &mut Narrator,
    ) -> Result<ToolDescriptor> {
        let listed: Vec<String> = tools.iter().map(|tool| tool.name.clone()).collect();
        narrator.note(format!("listed tools: {}", listed.join(", ")));

        let matcher = self.policy.tool_match;
        let tool = tools
            .into_iter()
            .find(|tool| matcher.matches(&tool.name, EXPECTED_TOOL))
            .ok_or_else(|| HarnessError::ToolNotFound {
                expected: matcher.describe(EXPECTED_TOOL),
                listed,
            })?;

        narrator.pass(format!("found `{}`", tool.name));
        if let Some(description) = &tool.description {
            narrator.note(format!("description: {description}"));
        }
        narrator.note(format!("input schema: {}", compact(&tool.input_schema)));
        if !tool.declares_property("path") {
            warn!(tool = %tool.name, "input schema does not declare `path`");
            narrator.warn("input schema does not declare a `path` property");
        }
        Ok(tool)
    }

    async fn check_absolute_write(&self, response: &JsonRpcResponse, target: &Path) -> Result<String> {
        let expectation = self.policy.write_expectation;
        let outcome = response
            .outcome()
            .map_err(|shape| HarnessError::violation(STEP_ABSOLUTE_WRITE, shape.to_string()))?;
        if !expectation.accepts(&outcome) {
            return Err(HarnessError::unexpected(
                STEP_ABSOLUTE_WRITE,
                format!(
                    "expected `{}` but the candidate answered with `{}`: {}",
                    expectation.expected_label(),
                    outcome.label(),
                    describe_outcome(&outcome)
                ),
            ));
        }

        match expectation {
            WriteExpectation::Succeeds => {
                let written = match tokio::fs::read_to_string(target).await {
                    Ok(text) => text,
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        return Err(HarnessError::unexpected(
                            STEP_VERIFY,
                            format!("{} was not created", target.display()),
                        ));
                    }
                    Err(err) => return Err(err.into()),
                };
                if written != WRITE_CONTENT {
                    return Err(HarnessError::unexpected(
                        STEP_VERIFY,
                        format!("{} contains {written:?}, expected {WRITE_CONTENT:?}", target.display()),
                    ));
                }
                debug!(path = %target.display(), "written file verified");
                Ok(format!("wrote {} with the expected content", target.display()))
            }
            WriteExpectation::Rejected => {
                if tokio::fs::try_exists(target).await? {
                    return Err(HarnessError::unexpected(
                        STEP_VERIFY,
                        format!("{} was created despite the rejection", target.display()),
                    ));
                }
                Ok(format!("sandbox rejected the write: {}", describe_outcome(&outcome)))
            }
        }
    }
}

fn record(number: u8, title: &'static str, detail: String) -> StepRecord {
    StepRecord {
        number,
        title,
        detail,
    }
}

fn write_arguments(path: &str, content: &str) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("path".to_string(), json!(path));
    arguments.insert("content".to_string(), json!(content));
    arguments
}

fn describe_outcome(outcome: &ResponseOutcome<'_>) -> String {
    match outcome {
        ResponseOutcome::Success(result) => compact(result),
        ResponseOutcome::Failure(error) => format!("{} ({})", error.message, error.code),
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

fn narrate_exchange<R, W>(session: &ProtocolSession<R, W>, narrator: &mut Narrator)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let channel = session.channel();
    narrator.exchange(channel.last_sent(), channel.last_received());
}

/// Classifies, builds, launches, and probes the candidate in `target`.
/// The candidate is torn down on every path out of this function.
pub async fn run_target(
    target: &Path,
    config: &HarnessConfig,
    narrator: &mut Narrator,
) -> Result<ScenarioReport> {
    let target = tokio::fs::canonicalize(target).await?;
    let variant = classify(&target)?;
    narrator.banner(&target, variant);
    let policy = variant.policy(&target, config)?;
    if let Some(plugin_config) = policy.plugin_config(&target) {
        narrator.note(format!("plugin host config: {}", plugin_config.display()));
    }

    if config.skip_build {
        narrator.note("build skipped");
    } else {
        narrator.note(format!("building: {}", policy.build.render()));
        if let Err(err) = supervisor::build(&policy, &target, config.build_timeout).await {
            narrator.fail("build failed");
            return Err(err);
        }
        narrator.pass("build succeeded");
    }

    let scratch = tempfile::Builder::new().prefix("mcp-conform-").tempdir()?;
    debug!(scratch = %scratch.path().display(), "created scratch directory");

    narrator.note(format!("launching: {}", policy.launch.render()));
    let mut session = match supervisor::launch(&policy, &target, config).await {
        Ok(session) => session,
        Err(err) => {
            narrator.fail("launch failed");
            return Err(err);
        }
    };

    let scenario = Scenario::new(policy, scratch.path(), config.client.clone());
    let outcome = scenario.run(session.protocol(), narrator).await;
    if let Err(err) = &outcome {
        narrate_failure(narrator, &mut session, err);
    }

    match session.teardown(config.teardown_timeout).await {
        Ok(status) => debug!(status = %status, "teardown finished"),
        Err(err) => warn!(error = %err, "teardown failed"),
    }
    drop(scratch);
    outcome
}

fn narrate_failure(narrator: &mut Narrator, session: &mut Session, err: &HarnessError) {
    narrator.fail(err);
    let stderr = session.stderr_tail();
    let channel = session.protocol().channel();
    narrator.context("last sent", channel.last_sent());
    narrator.context("last received", channel.last_received());
    narrator.context("discarded output", channel.discarded_lines());
    narrator.context("candidate stderr", stderr.iter().map(String::as_str));
}

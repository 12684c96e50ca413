use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Every failure is terminal for the run; nothing here is retried.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("build failed ({status}): {stderr}")]
    BuildFailure { status: String, stderr: String },
    #[error("failed to launch `{command}`: {reason}")]
    LaunchFailure { command: String, reason: String },
    #[error("candidate closed its output stream while {context}")]
    StreamClosed { context: String },
    #[error("malformed message while {context}: {reason} (line: {line})")]
    MalformedMessage {
        context: String,
        line: String,
        reason: String,
    },
    #[error("protocol violation during {step}: {detail}")]
    ProtocolViolation { step: String, detail: String },
    #[error("expected tool matching `{expected}` not listed (saw: {listed:?})")]
    ToolNotFound {
        expected: String,
        listed: Vec<String>,
    },
    #[error("unexpected outcome during {step}: {detail}")]
    UnexpectedOutcome { step: String, detail: String },
    #[error("timed out after {}s while {context}", .limit.as_secs_f32())]
    Timeout { context: String, limit: Duration },
    #[error("cannot determine how to launch {}: no build manifest found", .target.display())]
    UnknownVariant { target: PathBuf },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

impl HarnessError {
    pub(crate) fn violation(step: impl Into<String>, detail: impl Into<String>) -> Self {
        HarnessError::ProtocolViolation {
            step: step.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn unexpected(step: impl Into<String>, detail: impl Into<String>) -> Self {
        HarnessError::UnexpectedOutcome {
            step: step.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

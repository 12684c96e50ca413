//! Line-oriented framing over a candidate's stdio pipes.
//!
//! Outbound messages are written as one JSON object per line and flushed
//! immediately. Inbound lines either carry a message (first non-whitespace
//! character is `{`) or are incidental diagnostic output from the candidate,
//! which filtered reads discard and raw reads reject.

use std::collections::VecDeque;
use std::time::Duration;

use mcp_wire::looks_like_message;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{HarnessError, Result};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const RETAINED_DISCARDS: usize = 32;

pub struct MessageChannel<R, W> {
    reader: BufReader<R>,
    writer: W,
    timeout: Duration,
    filter_non_message_lines: bool,
    awaiting: String,
    last_sent: Option<String>,
    last_received: Option<String>,
    discarded: VecDeque<String>,
}

impl<R, W> MessageChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, timeout: Duration, filter_non_message_lines: bool) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            timeout,
            filter_non_message_lines,
            awaiting: "waiting for the first message".to_string(),
            last_sent: None,
            last_received: None,
            discarded: VecDeque::new(),
        }
    }

    pub fn filters_non_message_lines(&self) -> bool {
        self.filter_non_message_lines
    }

    /// Writes `message` as a single line. With `expect_response` the next
    /// message is read back using the channel's configured filter mode;
    /// otherwise this returns as soon as the line is flushed.
    pub async fn send<T>(&mut self, message: &T, expect_response: bool) -> Result<Option<Value>>
    where
        T: Serialize,
    {
        let value = serde_json::to_value(message)?;
        let mut encoded = serde_json::to_string(&value)?;
        if value.get("method").is_some() {
            self.awaiting = describe_pending(&value);
            self.last_received = None;
        }
        trace!(line = %encoded, "sending to candidate");
        self.last_sent = Some(encoded.clone());
        encoded.push('\n');
        self.writer.write_all(encoded.as_bytes()).await?;
        self.writer.flush().await?;

        if !expect_response {
            return Ok(None);
        }
        let filter = self.filter_non_message_lines;
        self.receive(filter).await.map(Some)
    }

    /// Reads until a message line arrives. The timeout bounds the whole call,
    /// including any diagnostic lines skipped along the way. Lines are read as
    /// raw bytes: diagnostic output need not be UTF-8, message lines must be.
    pub async fn receive(&mut self, filter_non_message_lines: bool) -> Result<Value> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::time::timeout_at(deadline, self.reader.read_until(b'\n', &mut buf))
                .await
                .map_err(|_| HarnessError::Timeout {
                    context: self.awaiting.clone(),
                    limit: self.timeout,
                })??;
            if read == 0 {
                return Err(HarnessError::StreamClosed {
                    context: self.awaiting.clone(),
                });
            }

            let text = String::from_utf8_lossy(&buf);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !looks_like_message(trimmed) {
                if !filter_non_message_lines {
                    return Err(HarnessError::MalformedMessage {
                        context: self.awaiting.clone(),
                        line: trimmed.to_string(),
                        reason: "expected a JSON-RPC message".to_string(),
                    });
                }
                debug!(target: "mcp_conform::candidate", stream = "stdout", line = trimmed, "discarding non-message output");
                if self.discarded.len() == RETAINED_DISCARDS {
                    self.discarded.pop_front();
                }
                self.discarded.push_back(trimmed.to_string());
                continue;
            }

            self.last_received = Some(trimmed.to_string());
            return serde_json::from_slice::<Value>(&buf).map_err(|err| {
                HarnessError::MalformedMessage {
                    context: self.awaiting.clone(),
                    line: trimmed.to_string(),
                    reason: err.to_string(),
                }
            });
        }
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    pub fn last_received(&self) -> Option<&str> {
        self.last_received.as_deref()
    }

    pub fn discarded_lines(&self) -> impl Iterator<Item = &str> {
        self.discarded.iter().map(String::as_str)
    }
}

fn describe_pending(message: &Value) -> String {
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("message");
    match message.get("id") {
        Some(id) if !id.is_null() => format!("waiting for the `{method}` response (id {id})"),
        _ => format!("waiting after `{method}`"),
    }
}

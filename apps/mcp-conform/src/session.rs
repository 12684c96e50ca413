//! One protocol conversation: handshake, discovery, and tool calls, strictly
//! one request in flight at a time.

use mcp_wire::{
    ClientInfo, ERROR_METHOD_NOT_FOUND, InitializeParams, JSONRPC_VERSION, JsonRpcRequest,
    JsonRpcResponse, ResponseOutcome, ToolDescriptor, ToolsListResult, method, tools_call_params,
};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::channel::MessageChannel;
use crate::error::{HarnessError, Result};

pub struct ProtocolSession<R, W> {
    channel: MessageChannel<R, W>,
    next_id: u64,
    issued: Vec<u64>,
}

impl<R, W> ProtocolSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(channel: MessageChannel<R, W>) -> Self {
        Self {
            channel,
            next_id: 1,
            issued: Vec::new(),
        }
    }

    pub fn channel(&self) -> &MessageChannel<R, W> {
        &self.channel
    }

    /// Correlation ids in the order they were sent.
    pub fn issued_ids(&self) -> &[u64] {
        &self.issued
    }

    /// The handshake must succeed; an `error` reply is reported as an
    /// unexpected outcome rather than returned.
    pub async fn initialize(&mut self, client: &ClientInfo) -> Result<JsonRpcResponse> {
        let params = serde_json::to_value(InitializeParams::new(client.clone()))?;
        let response = self.call(method::INITIALIZE, params).await?;
        if let Ok(ResponseOutcome::Failure(error)) = response.outcome() {
            return Err(HarnessError::unexpected(
                method::INITIALIZE,
                format!("handshake rejected ({}): {}", error.code, error.message),
            ));
        }
        Ok(response)
    }

    /// Fire-and-forget; nothing is read back.
    pub async fn notify_initialized(&mut self) -> Result<()> {
        let notification = JsonRpcRequest::notification(method::INITIALIZED, json!({}));
        self.channel.send(&notification, false).await?;
        Ok(())
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let response = self.call(method::TOOLS_LIST, json!({})).await?;
        let result = match response.outcome() {
            Ok(ResponseOutcome::Success(result)) => result.clone(),
            Ok(ResponseOutcome::Failure(error)) => {
                return Err(HarnessError::violation(
                    method::TOOLS_LIST,
                    format!("listing failed: {}", error.message),
                ));
            }
            Err(shape) => return Err(HarnessError::violation(method::TOOLS_LIST, shape.to_string())),
        };
        let listing: ToolsListResult = serde_json::from_value(result).map_err(|err| {
            HarnessError::violation(
                method::TOOLS_LIST,
                format!("result is not a tool listing: {err}"),
            )
        })?;
        Ok(listing.tools)
    }

    /// Returns the raw response; whether success or rejection is correct
    /// depends on the variant and the arguments.
    pub async fn invoke_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<JsonRpcResponse> {
        self.call(method::TOOLS_CALL, tools_call_params(name, arguments))
            .await
    }

    async fn call(&mut self, method_name: &str, params: Value) -> Result<JsonRpcResponse> {
        let id = self.next_id;
        self.next_id += 1;
        self.issued.push(id);

        let request = JsonRpcRequest::request(id, method_name, params);
        let mut pending = self.channel.send(&request, true).await?;
        loop {
            let value = match pending.take() {
                Some(value) => value,
                None => {
                    let filter = self.channel.filters_non_message_lines();
                    self.channel.receive(filter).await?
                }
            };

            if let Some(server_method) = value.get("method").and_then(Value::as_str) {
                self.answer_server_message(server_method, &value).await?;
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(value.clone()).map_err(|err| {
                    HarnessError::MalformedMessage {
                        context: format!("decoding the `{method_name}` response"),
                        line: value.to_string(),
                        reason: err.to_string(),
                    }
                })?;
            if response.jsonrpc != JSONRPC_VERSION {
                return Err(HarnessError::violation(
                    method_name,
                    format!("unexpected jsonrpc tag {:?}", response.jsonrpc),
                ));
            }
            match response.numeric_id() {
                Some(echoed) if echoed == id => {}
                other => {
                    return Err(HarnessError::violation(
                        method_name,
                        format!("expected response id {id}, got {other:?}"),
                    ));
                }
            }
            response
                .outcome()
                .map_err(|shape| HarnessError::violation(method_name, shape.to_string()))?;
            return Ok(response);
        }
    }

    /// Server notifications are skipped; server requests get a
    /// method-not-found reply so the candidate is not left waiting.
    async fn answer_server_message(&mut self, server_method: &str, message: &Value) -> Result<()> {
        match message.get("id").filter(|id| !id.is_null()) {
            None => {
                debug!(method = server_method, "skipping server notification");
            }
            Some(server_id) => {
                warn!(method = server_method, id = %server_id, "declining server-initiated request");
                let reply = json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": server_id,
                    "error": {
                        "code": ERROR_METHOD_NOT_FOUND,
                        "message": format!("method '{server_method}' not supported by the probe"),
                    }
                });
                self.channel.send(&reply, false).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DEFAULT_RESPONSE_TIMEOUT;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf, duplex,
        split,
    };
    use tokio::task::JoinHandle;

    type TestSession = ProtocolSession<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    /// Answers each request line with the scripted replies produced by
    /// `respond`, returning every line it received.
    fn scripted<F>(filter: bool, mut respond: F) -> (TestSession, JoinHandle<Vec<Value>>)
    where
        F: FnMut(&Value) -> Vec<String> + Send + 'static,
    {
        let (ours, theirs) = duplex(16 * 1024);
        let (read_half, write_half) = split(ours);
        let channel = MessageChannel::new(read_half, write_half, DEFAULT_RESPONSE_TIMEOUT, filter);
        let server = tokio::spawn(async move {
            let (reader, mut writer) = split(theirs);
            let mut lines = BufReader::new(reader).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                for reply in respond(&message) {
                    writer.write_all(reply.as_bytes()).await.unwrap();
                    writer.write_all(b"\n").await.unwrap();
                }
                writer.flush().await.unwrap();
                seen.push(message);
            }
            seen
        });
        (ProtocolSession::new(channel), server)
    }

    fn echo_result(message: &Value, result: Value) -> Vec<String> {
        match message.get("id") {
            Some(id) => vec![json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()],
            None => Vec::new(),
        }
    }

    #[test_timeout::timeout(10)]
    async fn ids_start_at_one_and_increase_by_one() {
        let (mut session, server) = scripted(false, |message| match message["method"].as_str() {
            Some("tools/list") => echo_result(message, json!({"tools": []})),
            _ => echo_result(message, json!({"serverInfo": {"name": "fake", "version": "0"}})),
        });

        session
            .initialize(&ClientInfo::new("probe", "1.0.0"))
            .await
            .unwrap();
        session.notify_initialized().await.unwrap();
        session.list_tools().await.unwrap();
        session.invoke_tool("write_file", Map::new()).await.unwrap();
        assert_eq!(session.issued_ids(), &[1, 2, 3]);
        drop(session);

        let seen = server.await.unwrap();
        let ids: Vec<Option<u64>> = seen.iter().map(|m| m["id"].as_u64()).collect();
        assert_eq!(ids, vec![Some(1), None, Some(2), Some(3)]);
        assert_eq!(seen[0]["params"]["protocolVersion"], "2024-11-05");
        assert_eq!(seen[0]["params"]["clientInfo"]["name"], "probe");
        assert_eq!(seen[1]["method"], "notifications/initialized");
        assert_eq!(seen[3]["params"]["name"], "write_file");
    }

    #[test_timeout::timeout(10)]
    async fn response_without_payload_is_a_violation() {
        let (mut session, _server) = scripted(false, |message| {
            vec![json!({"jsonrpc": "2.0", "id": message["id"]}).to_string()]
        });
        let err = session
            .initialize(&ClientInfo::new("probe", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ProtocolViolation { .. }), "{err}");
    }

    #[test_timeout::timeout(10)]
    async fn rejected_handshake_is_unexpected() {
        let (mut session, _server) = scripted(false, |message| {
            vec![json!({
                "jsonrpc": "2.0",
                "id": message["id"],
                "error": {"code": -32600, "message": "unsupported protocol version"}
            })
            .to_string()]
        });
        let err = session
            .initialize(&ClientInfo::new("probe", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::UnexpectedOutcome { .. }), "{err}");
    }

    #[test_timeout::timeout(10)]
    async fn mismatched_id_is_a_violation() {
        let (mut session, _server) = scripted(false, |_| {
            vec![json!({"jsonrpc": "2.0", "id": 99, "result": {}}).to_string()]
        });
        let err = session
            .initialize(&ClientInfo::new("probe", "1.0.0"))
            .await
            .unwrap_err();
        match err {
            HarnessError::ProtocolViolation { detail, .. } => {
                assert!(detail.contains("expected response id 1"), "{detail}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test_timeout::timeout(10)]
    async fn server_notifications_and_requests_are_skipped() {
        let (mut session, server) = scripted(true, |message| {
            if message.get("method").is_none() {
                return Vec::new();
            }
            let mut replies = vec![
                "plugin host ready".to_string(),
                json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}})
                    .to_string(),
                json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"}).to_string(),
            ];
            replies.extend(echo_result(message, json!({"tools": [{"name": "write_file"}]})));
            replies
        });

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "write_file");
        drop(session);

        let seen = server.await.unwrap();
        let reply = &seen[1];
        assert_eq!(reply["id"], "srv-1");
        assert_eq!(reply["error"]["code"], ERROR_METHOD_NOT_FOUND);
    }

    #[test_timeout::timeout(10)]
    async fn tool_listing_must_be_an_array() {
        let (mut session, _server) =
            scripted(false, |message| echo_result(message, json!({"tools": "write_file"})));
        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, HarnessError::ProtocolViolation { .. }), "{err}");
    }

    #[test_timeout::timeout(10)]
    async fn invoke_tool_returns_error_responses_untouched() {
        let (mut session, _server) = scripted(false, |message| {
            vec![json!({
                "jsonrpc": "2.0",
                "id": message["id"],
                "error": {"code": -32602, "message": "path must be absolute"}
            })
            .to_string()]
        });
        let mut arguments = Map::new();
        arguments.insert("path".to_string(), json!("relative/path.txt"));
        let response = session.invoke_tool("write_file", arguments).await.unwrap();
        match response.outcome() {
            Ok(ResponseOutcome::Failure(error)) => {
                assert_eq!(error.message, "path must be absolute");
                assert_eq!(error.code, -32602);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test_timeout::timeout(10)]
    async fn error_without_message_is_a_violation() {
        let (mut session, _server) = scripted(false, |message| {
            vec![json!({"jsonrpc": "2.0", "id": message["id"], "error": {"code": -32603}})
                .to_string()]
        });
        let err = session.invoke_tool("write_file", Map::new()).await.unwrap_err();
        match err {
            HarnessError::ProtocolViolation { step, detail } => {
                assert_eq!(step, "tools/call");
                assert!(detail.contains("string `message`"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

//! Wire types for the JSON-RPC tool protocol spoken over stdio.
//! Kept apart from the harness so the message shapes can be reused by
//! scripted test servers without pulling in process supervision.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;

/// True when the first non-whitespace character opens a JSON object.
pub fn looks_like_message(line: &str) -> bool {
    line.trim_start().starts_with('{')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response as observed on the wire. Both payload slots are optional and
/// `error` is kept untyped here; `outcome` enforces that exactly one slot is
/// present and that the error object is well formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome<'a> {
    Success(&'a Value),
    Failure(JsonRpcError),
}

impl ResponseOutcome<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            ResponseOutcome::Success(_) => "result",
            ResponseOutcome::Failure(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("response carries neither `result` nor `error`")]
    MissingPayload,
    #[error("response carries both `result` and `error`")]
    AmbiguousPayload,
    #[error("`error` is not an object with a string `message`: {0}")]
    InvalidError(String),
}

impl JsonRpcResponse {
    pub fn outcome(&self) -> Result<ResponseOutcome<'_>, ShapeError> {
        match (&self.result, &self.error) {
            (Some(result), None) => Ok(ResponseOutcome::Success(result)),
            (None, Some(error)) => serde_json::from_value(error.clone())
                .map(ResponseOutcome::Failure)
                .map_err(|err| ShapeError::InvalidError(err.to_string())),
            (None, None) => Err(ShapeError::MissingPayload),
            (Some(_), Some(_)) => Err(ShapeError::AmbiguousPayload),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome(), Ok(ResponseOutcome::Success(_)))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome(), Ok(ResponseOutcome::Failure(_)))
    }

    /// The correlation id as an integer, accepting numeric strings the way
    /// lenient servers echo them back.
    pub fn numeric_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(num) => num.as_u64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({ "roots": { "listChanged": true } }),
            client_info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Whether the declared input schema names `property`.
    pub fn declares_property(&self, property: &str) -> bool {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|props| props.contains_key(property))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDescriptor>,
}

pub fn tools_call_params(name: &str, arguments: Map<String, Value>) -> Value {
    json!({
        "name": name,
        "arguments": Value::Object(arguments),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn marker_ignores_leading_whitespace() {
        assert!(looks_like_message("  {\"jsonrpc\":\"2.0\"}"));
        assert!(!looks_like_message("Compiling poc v0.1.0"));
        assert!(!looks_like_message("[1, 2]"));
        assert!(!looks_like_message(""));
    }

    #[test_timeout::timeout]
    fn notification_omits_id_on_the_wire() {
        let note = JsonRpcRequest::notification(method::INITIALIZED, json!({}));
        let text = serde_json::to_string(&note).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(note.is_notification());
    }

    #[test_timeout::timeout]
    fn outcome_requires_exactly_one_payload() {
        let missing: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert_eq!(missing.outcome(), Err(ShapeError::MissingPayload));

        let both: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#,
        )
        .unwrap();
        assert_eq!(both.outcome(), Err(ShapeError::AmbiguousPayload));

        let failure: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32602,"message":"path must be absolute"}}"#,
        )
        .unwrap();
        assert!(failure.is_error());
        assert_eq!(failure.numeric_id(), Some(4));
    }

    #[test_timeout::timeout]
    fn malformed_error_object_is_a_shape_error() {
        for error in [r#""denied""#, r#"{"code":-32603}"#, r#"{"message":7}"#] {
            let response: JsonRpcResponse = serde_json::from_str(&format!(
                r#"{{"jsonrpc":"2.0","id":2,"error":{error}}}"#
            ))
            .unwrap();
            assert!(
                matches!(response.outcome(), Err(ShapeError::InvalidError(_))),
                "{error}"
            );
            assert!(!response.is_error());
        }

        let bare: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"error":{"message":"denied"}}"#)
                .unwrap();
        match bare.outcome() {
            Ok(ResponseOutcome::Failure(error)) => {
                assert_eq!(error.message, "denied");
                assert_eq!(error.code, 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn string_ids_are_accepted() {
        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"7","result":{}}"#).unwrap();
        assert_eq!(response.numeric_id(), Some(7));
    }

    #[test_timeout::timeout]
    fn descriptor_reads_camel_case_schema() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "write_file",
            "description": "Write content to a file",
            "inputSchema": {
                "type": "object",
                "properties": { "path": {"type": "string"}, "content": {"type": "string"} }
            }
        }))
        .unwrap();
        assert!(tool.declares_property("path"));
        assert!(!tool.declares_property("mode"));
    }
}

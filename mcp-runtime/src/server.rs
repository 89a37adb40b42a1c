//! JSON-RPC over stdio: framing, request routing and cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use evo_core::objects::schema_reference_markdown;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::RpcError;
use crate::prompts::{SCHEMA_REFERENCE_URI, find_prompt, schema_reference_resource, visible_prompts};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];
/// Upper bound on a `Content-Length` framed body.
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
pub const MCP_SERVER_NAME: &str = "evo-mcp";

/// How a message was delimited on the wire. Responses reuse the framing of
/// the message they answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength,
    Newline,
}

#[derive(Clone)]
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn serve_stdio(self) -> Result<(), String> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve until `reader` reaches EOF, then wait for in-flight requests.
    pub async fn serve<R, W>(self, mut reader: R, writer: W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<(Framing, Value)>();
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let mut handlers = JoinSet::new();

        loop {
            let message = read_message(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some((framing, payload)) = message else {
                break;
            };
            let incoming = match payload {
                Ok(incoming) => incoming,
                Err(err) => {
                    tracing::warn!(error = %err, "unparseable MCP message");
                    let _ = tx.send((
                        framing,
                        error_response(Value::Null, RpcError::parse_error(format!("Parse error: {err}"))),
                    ));
                    continue;
                }
            };

            // Registered before spawning so a cancellation that arrives right
            // behind its request always finds the token.
            self.admit(&incoming);
            let server = self.clone();
            let tx = tx.clone();
            handlers.spawn(async move {
                if let Some(response) = server.handle_incoming_message(incoming).await {
                    let _ = tx.send((framing, response));
                }
            });
        }

        while handlers.join_next().await.is_some() {}
        drop(tx);
        writer_task
            .await
            .map_err(|e| format!("MCP writer task failed: {e}"))?
    }

    fn admit(&self, incoming: &Value) {
        let items: Vec<&Value> = match incoming {
            Value::Array(batch) => batch.iter().collect(),
            single => vec![single],
        };
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        for item in items {
            if item.get("method").is_some()
                && let Some(id) = item.get("id")
            {
                in_flight.entry(request_key(id)).or_default();
            }
        }
    }

    fn cancel_token(&self, id: &Value) -> CancellationToken {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.get(&request_key(id)).cloned().unwrap_or_default()
    }

    fn finish(&self, id: &Value) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&request_key(id));
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Option<Value> {
        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                return Some(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
            }
            let responses: Vec<Value> =
                futures::future::join_all(batch.iter().cloned().map(|m| self.handle_single_message(m)))
                    .await
                    .into_iter()
                    .flatten()
                    .collect();
            return if responses.is_empty() {
                None
            } else {
                Some(Value::Array(responses))
            };
        }
        self.handle_single_message(incoming).await
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(id, RpcError::invalid_request("jsonrpc must be '2.0'")));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Responses to server-initiated requests; this server sends none.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let Some(id) = obj.get("id").cloned() else {
            self.handle_notification(method, params);
            return None;
        };

        let cancel = self.cancel_token(&id);
        tracing::debug!(method, id = %id, "request");
        let result = self.handle_request(method, params, cancel.clone()).await;
        self.finish(&id);
        if cancel.is_cancelled() {
            tracing::debug!(method, id = %id, "request cancelled; no response sent");
            return None;
        }
        Some(match result {
            Ok(payload) => success_response(id, payload),
            Err(err) => error_response(id, err),
        })
    }

    fn handle_notification(&self, method: &str, params: Value) {
        match method {
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else {
                    return;
                };
                let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(token) = in_flight.get(&request_key(request_id)) {
                    tracing::info!(
                        request_id = %request_id,
                        reason = params.get("reason").and_then(|v| v.as_str()).unwrap_or(""),
                        "client cancelled request"
                    );
                    token.cancel();
                }
            }
            "notifications/initialized" => tracing::debug!("client initialized"),
            other => tracing::debug!(method = other, "ignoring notification"),
        }
    }

    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params, cancel).await,
            "resources/list" => Ok(json!({ "resources": [schema_reference_resource()] })),
            "resources/read" => handle_resources_read(&params),
            "prompts/list" => Ok(self.prompts_list_payload()),
            "prompts/get" => self.handle_prompts_get(&params),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self, params: &Value) -> Value {
        let requested = params.get("protocolVersion").and_then(Value::as_str);
        let protocol_version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(MCP_PROTOCOL_VERSION);
        let filter = self.dispatcher.filter();
        let instructions = format!(
            "Tools for the Seequent Evo geoscience platform (tool filter: {filter}). \
             Calls operate on the selected Evo instance; the first available instance is selected automatically, \
             use list_my_instances and select_instance to change it. \
             Before import_csv, preview the file with preview_csv_file and run import_csv with dry_run=true. \
             Tool errors carry a kind and a retryable flag."
        );
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": instructions
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = self
            .dispatcher
            .visible_tools()
            .iter()
            .map(|tool| tool.to_list_entry())
            .collect();
        json!({ "tools": tools })
    }

    fn prompts_list_payload(&self) -> Value {
        let prompts: Vec<Value> = visible_prompts(self.dispatcher.filter())
            .map(|p| p.to_list_entry())
            .collect();
        json!({ "prompts": prompts })
    }

    fn handle_prompts_get(&self, params: &Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("prompts/get requires string field 'name'"))?;
        find_prompt(self.dispatcher.filter(), name)
            .map(|p| p.to_get_payload())
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown prompt: {name}")))
    }

    async fn handle_tools_call(
        &self,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;
        let args = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(RpcError::invalid_params("tools/call arguments must be an object"));
            }
        };

        Ok(match self.dispatcher.dispatch(name, args, cancel).await {
            Ok(result) => build_tool_call_response(result, false),
            Err(err) => build_tool_call_response(err.to_value(), true),
        })
    }
}

fn handle_resources_read(params: &Value) -> Result<Value, RpcError> {
    let uri = params
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("resources/read requires string field 'uri'"))?;
    if uri != SCHEMA_REFERENCE_URI {
        return Err(RpcError::invalid_params(format!("Unknown resource: {uri}")));
    }
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "text/markdown",
            "text": schema_reference_markdown(),
        }]
    }))
}

fn request_key(id: &Value) -> String {
    id.to_string()
}

fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    let text = to_pretty_json(&envelope);
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// Read one message in either framing. `Ok(None)` at clean EOF; the inner
/// `Err` carries a JSON syntax error for a message that was fully read.
pub(crate) async fn read_message<R>(
    reader: &mut R,
) -> Result<Option<(Framing, Result<Value, String>)>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.to_ascii_lowercase().starts_with("content-length:") {
            let parsed = serde_json::from_str(trimmed).map_err(|e| e.to_string());
            return Ok(Some((Framing::Newline, parsed)));
        }

        let content_length = trimmed
            .split_once(':')
            .map(|(_, right)| right.trim())
            .unwrap_or_default()
            .parse::<usize>()
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid Content-Length header")
            })?;
        if content_length > MAX_MESSAGE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Content-Length {content_length} exceeds the {MAX_MESSAGE_BYTES} byte limit"),
            ));
        }
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Unexpected EOF while reading MCP headers",
                ));
            }
            if header.trim().is_empty() {
                break;
            }
        }
        let mut payload = vec![0_u8; content_length];
        reader.read_exact(&mut payload).await?;
        let parsed = serde_json::from_slice(&payload).map_err(|e| e.to_string());
        return Ok(Some((Framing::ContentLength, parsed)));
    }
}

pub(crate) async fn write_message<W>(
    writer: &mut W,
    framing: Framing,
    value: &Value,
) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::Newline => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<(Framing, Value)>) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    while let Some((framing, value)) = rx.recv().await {
        write_message(&mut writer, framing, &value)
            .await
            .map_err(|e| format!("Failed to write MCP response: {e}"))?;
    }
    Ok(())
}

pub(crate) fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_both_framings_from_one_stream() {
        let body = r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#;
        let input = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}}\n\nContent-Length: {}\r\nContent-Type: application/json\r\n\r\n{body}",
            body.len()
        );
        let mut reader = BufReader::new(input.as_bytes());

        let (framing, first) = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(framing, Framing::Newline);
        assert_eq!(first.unwrap()["id"], 1);

        let (framing, second) = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(framing, Framing::ContentLength);
        assert_eq!(second.unwrap()["id"], 2);

        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_json_is_reported_without_ending_the_stream() {
        let mut reader = BufReader::new("{not json\n{\"jsonrpc\":\"2.0\"}\n".as_bytes());
        let (_, first) = read_message(&mut reader).await.unwrap().unwrap();
        assert!(first.is_err());
        let (_, second) = read_message(&mut reader).await.unwrap().unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn oversized_content_length_is_refused_before_reading_the_body() {
        let input = format!("Content-Length: {}\r\n\r\n{{}}", MAX_MESSAGE_BYTES + 1);
        let mut reader = BufReader::new(input.as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn writes_mirror_the_framing() {
        let mut out = Vec::new();
        write_message(&mut out, Framing::ContentLength, &json!({ "a": 1 }))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Content-Length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"a\":1}"));

        let mut out = Vec::new();
        write_message(&mut out, Framing::Newline, &json!({ "a": 1 }))
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"a\":1}\n");
    }

    #[test]
    fn tool_error_results_are_flagged() {
        let response = build_tool_call_response(json!({ "error": { "kind": "cancelled" } }), true);
        assert_eq!(response["isError"], true);
        assert_eq!(response["structuredContent"]["error"]["kind"], "cancelled");
        assert!(response["content"][0]["text"].as_str().unwrap().contains("cancelled"));
        assert!(build_tool_call_response(json!({}), false).get("isError").is_none());
    }

    #[test]
    fn unknown_resources_are_invalid_params() {
        let err = handle_resources_read(&json!({ "uri": "evo://nope" })).unwrap_err();
        assert_eq!(err.code, -32602);
        let ok = handle_resources_read(&json!({ "uri": SCHEMA_REFERENCE_URI })).unwrap();
        assert!(ok["contents"][0]["text"].as_str().unwrap().contains("pointset"));
    }
}

use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncWrite, BufReader};

pub mod config;
pub mod datalog;
pub mod gateway;
pub mod resources;
pub mod tools;

mod args;
#[cfg(test)]
mod fake;
mod transport;

use config::{ConfigError, DEFAULT_NOTES_PREFIX, GatewayConfig};
use gateway::{FailurePolicy, LogseqApi, LogseqHttpClient};
use resources::ResourceError;
use tools::{RegistryError, ToolContext, ToolRegistry, to_pretty_json};
use transport::{read_message, write_message};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "logseq-mcp";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Logseq MCP server over stdio
    Serve(McpServeArgs),
    /// Probe the Logseq HTTP API and print a JSON report
    Check,
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    /// Namespace prefix for notes synced without an explicit pagePrefix
    #[arg(long, env = "LOGSEQ_MCP_NOTES_PREFIX", default_value = DEFAULT_NOTES_PREFIX)]
    pub notes_prefix: String,
    /// Start even if the Logseq API does not answer the connectivity probe
    #[arg(long)]
    pub skip_probe: bool,
}

fn print_config_error(err: &ConfigError) {
    let payload = json!({
        "error": "config_error",
        "message": err.to_string(),
        "docs_hint": err.docs_hint(),
    });
    eprintln!("{}", to_pretty_json(&payload));
}

pub async fn run(api_url: &str, token: Option<String>, command: McpCommands) -> i32 {
    let config = match GatewayConfig::new(api_url, token) {
        Ok(config) => config,
        Err(err) => {
            print_config_error(&err);
            return 1;
        }
    };
    let client = LogseqHttpClient::new(&config);

    match command {
        McpCommands::Serve(args) => {
            if !args.skip_probe && !client.test_connection().await {
                let payload = json!({
                    "error": "logseq_unreachable",
                    "message": format!("Logseq API did not answer at {}", client.endpoint()),
                    "docs_hint": "Start Logseq with the HTTP API server enabled, or pass --skip-probe.",
                });
                eprintln!("{}", to_pretty_json(&payload));
                return 1;
            }

            let server = match McpServer::new(Arc::new(client), args.notes_prefix) {
                Ok(server) => server,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err.to_string(),
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    return 1;
                }
            };
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Check => {
            let graph = FailurePolicy::Degrade
                .settle(client.get_current_graph().await, None, "check")
                .unwrap_or(None);
            let reachable = graph.is_some();
            let report = json!({
                "endpoint": client.endpoint(),
                "reachable": reachable,
                "graph": graph,
            });
            println!("{}", to_pretty_json(&report));
            if reachable { 0 } else { 2 }
        }
    }
}

pub struct McpServer {
    api: Arc<dyn LogseqApi>,
    registry: ToolRegistry,
    notes_prefix: String,
}

impl McpServer {
    pub fn new(
        api: Arc<dyn LogseqApi>,
        notes_prefix: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            api,
            registry: ToolRegistry::build()?,
            notes_prefix: notes_prefix.into(),
        })
    }

    async fn serve_stdio(&self) -> Result<(), String> {
        let mut reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(&mut reader, &mut stdout).await
    }

    /// Answer messages until the reader is exhausted. Each reply uses the
    /// framing of the message it answers.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(
            server = MCP_SERVER_NAME,
            version = env!("CARGO_PKG_VERSION"),
            tools = self.registry.definitions().len(),
            "mcp server ready"
        );

        loop {
            let incoming = read_message(reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(incoming) = incoming else {
                break;
            };

            let response = match incoming.payload {
                Ok(message) => self.handle_incoming_message(message).await,
                Err(reason) => Some(error_response(Value::Null, RpcError::parse_error(reason))),
            };
            if let Some(response) = response {
                write_message(writer, &response, incoming.framing)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        tracing::info!(server = MCP_SERVER_NAME, "stdin closed; mcp server stopping");
        Ok(())
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Option<Value> {
        let Some(batch) = incoming.as_array() else {
            return self.handle_single_message(incoming).await;
        };
        if batch.is_empty() {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Batch request must not be empty"),
            ));
        }

        let mut responses = Vec::new();
        for item in batch {
            if let Some(response) = self.handle_single_message(item.clone()).await {
                responses.push(response);
            }
        }
        (!responses.is_empty()).then_some(Value::Array(responses))
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
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // a client response; this server never issues requests
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let Some(id) = obj.get("id").cloned() else {
            tracing::debug!(method, "notification ignored");
            return None;
        };

        Some(match self.handle_request(method, params).await {
            Ok(payload) => success_response(id, payload),
            Err(err) => {
                tracing::debug!(method, code = err.code, error = %err.message, "request failed");
                error_response(id, err)
            }
        })
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(self.resources_list_payload().await),
            "resources/templates/list" => {
                Ok(json!({ "resourceTemplates": resources::templates() }))
            }
            "resources/read" => self.handle_resources_read(params).await,
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                },
                "resources": {
                    "subscribe": false,
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Tools read, write and query the open Logseq graph. Use logseq_search or logseq_get_page before editing; write tools return the entity as it is after the change."
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = self
            .registry
            .definitions()
            .iter()
            .map(|tool| tool.to_value())
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let ctx = ToolContext {
            api: self.api.as_ref(),
            notes_prefix: &self.notes_prefix,
            now: Utc::now(),
        };
        Ok(self.registry.dispatch(&ctx, name, &args).await)
    }

    async fn resources_list_payload(&self) -> Value {
        let listed = resources::list(self.api.as_ref(), resources::local_today()).await;
        json!({ "resources": listed })
    }

    async fn handle_resources_read(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("resources/read params must be an object"))?;
        let uri = params.get("uri").and_then(Value::as_str).ok_or_else(|| {
            RpcError::invalid_params("resources/read requires string field 'uri'")
        })?;

        let payload = resources::read(self.api.as_ref(), uri, resources::local_today())
            .await
            .map_err(|err| match err {
                ResourceError::Unknown(_) => RpcError::invalid_params(err.to_string()),
                ResourceError::Gateway(_) => RpcError::internal(err.to_string()),
            })?;
        Ok(resources::contents(uri, &payload))
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: Some(json!({ "method": method })),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeGraph;

    fn server() -> (Arc<FakeGraph>, McpServer) {
        let api = Arc::new(FakeGraph::new());
        let server = McpServer::new(api.clone(), DEFAULT_NOTES_PREFIX).unwrap();
        (api, server)
    }

    /// Feed newline-delimited messages and collect one reply per output line.
    async fn exchange(server: &McpServer, messages: &[Value]) -> Vec<Value> {
        let input: String = messages.iter().map(|m| format!("{m}\n")).collect();
        let mut reader = input.as_bytes();
        let mut output = Vec::new();
        server.serve(&mut reader, &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn request(id: i64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    #[tokio::test]
    async fn initialize_advertises_protocol_and_capabilities() {
        let (_, server) = server();
        let replies = exchange(&server, &[request(1, "initialize", json!({}))]).await;
        let result = &replies[0]["result"];
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "logseq-mcp");
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["capabilities"]["resources"].is_object());
    }

    #[tokio::test]
    async fn tools_list_exposes_every_group() {
        let (_, server) = server();
        let replies = exchange(&server, &[request(1, "tools/list", Value::Null)]).await;
        let tools = replies[0]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 23);
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_result_not_a_protocol_fault() {
        let (api, server) = server();
        let replies = exchange(
            &server,
            &[request(4, "tools/call", json!({"name": "logseq_nope", "arguments": {}}))],
        )
        .await;
        assert!(replies[0].get("error").is_none());
        assert_eq!(replies[0]["result"]["isError"], true);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_tool_calls_are_invalid_params() {
        let (_, server) = server();
        let replies = exchange(
            &server,
            &[
                request(1, "tools/call", json!({"arguments": {}})),
                request(2, "tools/call", json!({"name": "logseq_search", "arguments": [1]})),
            ],
        )
        .await;
        assert_eq!(replies[0]["error"]["code"], -32602);
        assert_eq!(replies[1]["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn tool_call_runs_against_the_gateway() {
        let (api, server) = server();
        api.add_page("Inbox", false);
        let replies = exchange(
            &server,
            &[request(
                9,
                "tools/call",
                json!({"name": "logseq_append_to_page", "arguments": {"title": "Inbox", "content": "hi"}}),
            )],
        )
        .await;
        assert_eq!(replies[0]["id"], 9);
        assert!(replies[0]["result"].get("isError").is_none());
        assert_eq!(api.page_blocks("Inbox")[0].content, "hi");
    }

    #[tokio::test]
    async fn protocol_errors_and_notifications() {
        let (_, server) = server();
        let replies = exchange(
            &server,
            &[
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}),
                request(2, "sampling/createMessage", json!({})),
                json!("just a string"),
                request(3, "ping", Value::Null),
            ],
        )
        .await;
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0]["error"]["code"], -32600);
        assert_eq!(replies[1]["error"]["code"], -32601);
        assert_eq!(replies[2]["error"]["code"], -32600);
        assert_eq!(replies[3]["result"], json!({}));
    }

    #[tokio::test]
    async fn batches_reply_with_one_array() {
        let (_, server) = server();
        let replies = exchange(
            &server,
            &[
                json!([
                    request(1, "ping", Value::Null),
                    {"jsonrpc": "2.0", "method": "notifications/cancelled"},
                    request(2, "prompts/list", Value::Null)
                ]),
                json!([]),
            ],
        )
        .await;
        let batch = replies[0].as_array().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1]["result"]["prompts"], json!([]));
        assert_eq!(replies[1]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn unparsable_line_gets_parse_error_and_session_continues() {
        let (_, server) = server();
        let mut reader: &[u8] = b"{not json\n{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"ping\"}\n";
        let mut output = Vec::new();
        server.serve(&mut reader, &mut output).await.unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[1]["id"], 5);
    }

    #[tokio::test]
    async fn content_length_requests_get_content_length_replies() {
        let (_, server) = server();
        let body = request(1, "ping", Value::Null).to_string();
        let framed = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        let mut reader = framed.as_bytes();
        let mut output = Vec::new();
        server.serve(&mut reader, &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Content-Length: "));
        assert!(text.ends_with("\"result\":{}}"));
    }

    #[tokio::test]
    async fn resource_methods_route_through_the_router() {
        let (api, server) = server();
        api.add_page("Inbox", false);
        let replies = exchange(
            &server,
            &[
                request(1, "resources/templates/list", Value::Null),
                request(2, "resources/read", json!({"uri": "logseq://page/Inbox"})),
                request(3, "resources/read", json!({"uri": "logseq://nowhere"})),
                request(4, "resources/read", json!({})),
                request(5, "resources/list", Value::Null),
            ],
        )
        .await;

        assert_eq!(
            replies[0]["result"]["resourceTemplates"].as_array().map(Vec::len),
            Some(5)
        );
        let content = &replies[1]["result"]["contents"][0];
        assert_eq!(content["uri"], "logseq://page/Inbox");
        let payload: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["page"]["name"], "inbox");
        assert_eq!(replies[2]["error"]["code"], -32602);
        assert_eq!(replies[2]["error"]["message"], "Unknown resource URI: logseq://nowhere");
        assert_eq!(replies[3]["error"]["code"], -32602);
        assert!(replies[4]["result"]["resources"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn resource_read_gateway_failure_is_internal_error() {
        let (api, server) = server();
        api.set_unreachable();
        let replies = exchange(
            &server,
            &[
                request(1, "resources/read", json!({"uri": "logseq://graph"})),
                request(2, "resources/list", Value::Null),
            ],
        )
        .await;
        assert_eq!(replies[0]["error"]["code"], -32603);
        assert_eq!(replies[1]["result"]["resources"], json!([]));
    }
}

//! JSON-RPC 2.0 MCP server speaking newline-delimited messages on stdio.

use ringlog::*;
use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::tools;
use crate::config::Config;
use crate::dashboard;
use crate::prometheus;

const PROTOCOL_VERSION: &str = "2025-06-18";

/// MCP server state: the backend clients shared by all tools.
pub struct MCPServer {
    prometheus: prometheus::Client,
    dashboards: Option<dashboard::Client>,
}

impl MCPServer {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let prometheus = prometheus::Client::new(&config.prometheus_url)?
            .with_guardrails(config.guardrails.clone());

        let dashboards = config
            .dashboard_url
            .as_deref()
            .map(dashboard::Client::new)
            .transpose()?;

        Ok(Self {
            prometheus,
            dashboards,
        })
    }

    /// Run the server loop until stdin closes.
    pub async fn run_stdio(&self) -> anyhow::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        info!("MCP server ready, waiting for messages...");
        loop {
            let line = match lines.next_line().await? {
                Some(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    debug!("received message: {}", line);
                    line
                }
                None => {
                    info!("stdin closed, no more messages");
                    break;
                }
            };

            let message: Value = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("failed to parse JSON: {}", e);
                    continue;
                }
            };

            if let Some(response) = self.handle_message(message).await {
                let response = serde_json::to_string(&response)?;
                debug!("sending response: {}", response);
                stdout.write_all(response.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        info!("MCP server shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC message, returning the response if one is
    /// due. Notifications produce no response.
    async fn handle_message(&self, message: Value) -> Option<Value> {
        let method = message.get("method").and_then(|m| m.as_str());
        let id = message.get("id").cloned();
        let params = message.get("params");

        match method {
            Some("initialize") => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": {}
                    },
                    "serverInfo": {
                        "name": "genie-mcp",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }
            })),
            Some("tools/list") => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": tool_schemas()
                }
            })),
            Some("tools/call") => {
                let name = params
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("");
                let arguments = params
                    .and_then(|p| p.get("arguments"))
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let result = self.call_tool(name, &arguments).await;
                Some(tool_response(id, name, result))
            }
            Some(method) if method.starts_with("notifications/") => None,
            Some(method) => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": -32601,
                    "message": format!("method not found: {method}")
                }
            })),
            None => None,
        }
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, String> {
        info!("tool call: {}", name);
        match name {
            "list_metrics" => tools::list_metrics(&self.prometheus, arguments).await,
            "query_instant" => tools::query_instant(&self.prometheus, arguments).await,
            "query_range" => tools::query_range(&self.prometheus, arguments).await,
            "list_dashboards" => {
                tools::list_dashboards(self.dashboards.as_ref(), arguments).await
            }
            "set_dashboard_metadata" => {
                tools::set_dashboard_metadata(self.dashboards.as_ref(), arguments).await
            }
            _ => Err(format!("unknown tool: {name}")),
        }
    }
}

/// Wrap a tool outcome in a `tools/call` response. Tool failures stay
/// inside the result envelope (`isError`) rather than becoming transport
/// errors.
fn tool_response(id: Option<Value>, name: &str, result: Result<Value, String>) -> Value {
    match result {
        Ok(value) => {
            let text = value.to_string();
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{"type": "text", "text": text}]
                }
            })
        }
        Err(message) => {
            info!("tool {} failed: {}", name, message);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{"type": "text", "text": message}],
                    "isError": true
                }
            })
        }
    }
}

fn tool_schemas() -> Value {
    json!([
        {
            "name": "list_metrics",
            "description": "List the metric names available in the query backend",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Optional regex pattern to filter metric names"
                    }
                }
            }
        },
        {
            "name": "query_instant",
            "description": "Evaluate a PromQL query at a single point in time",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "PromQL query to execute"
                    },
                    "time": {
                        "type": "string",
                        "description": "Evaluation timestamp (RFC 3339 or Unix seconds), defaults to now"
                    }
                },
                "required": ["query"]
            }
        },
        {
            "name": "query_range",
            "description": "Evaluate a PromQL query over a time range",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "PromQL query to execute"
                    },
                    "start": {
                        "type": "string",
                        "description": "Range start (RFC 3339 or Unix seconds); used only when end is also set"
                    },
                    "end": {
                        "type": "string",
                        "description": "Range end (RFC 3339 or Unix seconds); the literal NOW means no fixed end"
                    },
                    "duration": {
                        "type": "string",
                        "description": "Lookback window such as 15m or 1h, used when no fixed range is given (default 1h)"
                    },
                    "step": {
                        "type": "string",
                        "description": "Query resolution step such as 30s; derived from width when omitted"
                    },
                    "width": {
                        "type": "number",
                        "description": "Rendered chart width in pixels, used to derive the step (default 1000)"
                    }
                },
                "required": ["query"]
            }
        },
        {
            "name": "list_dashboards",
            "description": "List the saved dashboards in the dashboard library",
            "inputSchema": {
                "type": "object",
                "properties": {}
            }
        },
        {
            "name": "set_dashboard_metadata",
            "description": "Rename a saved dashboard and optionally update its description",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "layout_id": {
                        "type": "string",
                        "description": "Layout identifier of the dashboard to update"
                    },
                    "name": {
                        "type": "string",
                        "description": "New display name (required, must be non-empty after trimming)"
                    },
                    "description": {
                        "type": "string",
                        "description": "New description"
                    }
                },
                "required": ["layout_id", "name"]
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LISTEN;

    fn server() -> MCPServer {
        let config = Config {
            prometheus_url: "http://localhost:9090".to_string(),
            dashboard_url: None,
            listen: DEFAULT_LISTEN.to_string(),
            guardrails: None,
            verbose: 0,
        };
        MCPServer::new(&config).expect("server builds")
    }

    #[tokio::test]
    async fn initialize_returns_server_info() {
        let server = server();
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {}
            }))
            .await
            .expect("response due");

        assert_eq!(response["id"], 1);
        assert_eq!(
            response["result"]["serverInfo"]["name"],
            json!("genie-mcp")
        );
        assert_eq!(
            response["result"]["protocolVersion"],
            json!(PROTOCOL_VERSION)
        );
    }

    #[tokio::test]
    async fn tools_list_names_all_tools() {
        let server = server();
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/list"
            }))
            .await
            .expect("response due");

        let tools = response["result"]["tools"]
            .as_array()
            .expect("tools array");
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["name"].as_str().expect("tool name"))
            .collect();
        assert_eq!(
            names,
            vec![
                "list_metrics",
                "query_instant",
                "query_range",
                "list_dashboards",
                "set_dashboard_metadata"
            ]
        );
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let server = server();
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized"
            }))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_a_rpc_error() {
        let server = server();
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "resources/list"
            }))
            .await
            .expect("response due");
        assert_eq!(response["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_error() {
        let server = server();
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {"name": "no_such_tool", "arguments": {}}
            }))
            .await
            .expect("response due");

        assert_eq!(response["result"]["isError"], json!(true));
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("unknown tool"));
    }

    #[tokio::test]
    async fn dashboard_tools_require_configuration() {
        let server = server();
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "tools/call",
                "params": {"name": "list_dashboards", "arguments": {}}
            }))
            .await
            .expect("response due");

        assert_eq!(response["result"]["isError"], json!(true));
    }

    #[tokio::test]
    async fn query_range_rejects_bad_timestamps_locally() {
        let server = server();
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 6,
                "method": "tools/call",
                "params": {
                    "name": "query_range",
                    "arguments": {
                        "query": "up{job=\"api\"}",
                        "start": "not-a-date",
                        "end": "2024-01-02T00:00:00Z"
                    }
                }
            }))
            .await
            .expect("response due");

        assert_eq!(response["result"]["isError"], json!(true));
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains("invalid timestamp"));
    }
}

//! MCP server implementation
//!
//! Implements the stdio transport for the Model Context Protocol. Logging
//! must go to stderr: stdout carries the protocol.

use super::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolResult, MCP_PROTOCOL_VERSION,
};
use super::tools::{get_tool_definitions, handle_tool_call};
use crate::fetch::FetchConfig;
use crate::source::SearchConfig;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Server-wide configuration shared by all tool calls
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default directory saved images land in
    pub download_dir: PathBuf,
    /// Search adapter configuration
    pub search: SearchConfig,
    /// HTTP behavior for probes and downloads
    pub fetch: FetchConfig,
    /// When set, content hashes persist here for cross-run dedup
    pub seen_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            download_dir: crate::default_download_dir(),
            search: SearchConfig::default(),
            fetch: FetchConfig::default(),
            seen_path: None,
        }
    }
}

/// MCP server for imgharvest
pub struct McpServer {
    config: ServerConfig,
}

impl McpServer {
    pub fn new(config: ServerConfig) -> Self {
        McpServer { config }
    }

    /// Run the server on stdio until EOF
    pub async fn run(&self) -> crate::Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();

        tracing::info!(
            "imgharvest MCP server started (protocol version {})",
            MCP_PROTOCOL_VERSION
        );

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!("received: {}", line);

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(format!("Parse error: {}", e)),
                ),
            };

            let response_json = serde_json::to_string(&response)?;
            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
            tracing::debug!("sent: {}", response_json);
        }

        tracing::info!("EOF received, shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "notifications/initialized" => {
                return JsonRpcResponse::success(request.id, json!({}));
            }
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(&request.params).await,
            "ping" => Ok(json!({})),
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        }
    }

    fn handle_initialize(&self) -> std::result::Result<Value, JsonRpcError> {
        Ok(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "imgharvest",
                "version": crate::VERSION,
            }
        }))
    }

    fn handle_tools_list(&self) -> std::result::Result<Value, JsonRpcError> {
        let tools = get_tool_definitions();
        Ok(json!({ "tools": tools }))
    }

    async fn handle_tools_call(
        &self,
        params: &Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params = params
            .as_ref()
            .ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;

        let tool_name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| JsonRpcError::invalid_params("Missing tool name"))?;

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let result: ToolResult = handle_tool_call(&self.config, tool_name, &arguments).await?;

        serde_json::to_value(result).map_err(|e| JsonRpcError::server_error(e.to_string()))
    }
}

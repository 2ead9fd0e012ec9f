//! MCP tool handlers
//!
//! Each handler turns a tool call into pipeline work and wraps the outcome
//! in a [`ToolResult`]. Fatal pipeline errors map to JSON-RPC server errors;
//! per-candidate failures are already inside the Manifest.

use super::protocol::{JsonRpcError, ToolDefinition, ToolResult};
use super::server::ServerConfig;
use crate::dedup::{FileSeenStore, SeenStore};
use crate::fetch::HttpFetcher;
use crate::pipeline::{Pipeline, RunContext, RunOptions};
use crate::source::WebSearchSource;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Get all tool definitions
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "crawl_images".to_string(),
            description: "Search the web for images matching a keyword, score and deduplicate the candidates, download the best ones, and return a manifest of the outcome.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search keyword (e.g. 'chest radiograph', 'lighthouse at dusk')"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum candidates to consider (default: 10)",
                        "default": 10
                    },
                    "min_score": {
                        "type": "number",
                        "description": "Minimum relevance score in [0, 1]; lower-scoring candidates are skipped (default: 0.0)",
                        "default": 0.0
                    },
                    "concurrency": {
                        "type": "integer",
                        "description": "Maximum downloads in flight at once (default: 4)",
                        "default": 4
                    },
                    "download_dir": {
                        "type": "string",
                        "description": "Directory to save images into (default: server download dir)"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "crawl_status".to_string(),
            description: "Report server configuration: download directory, search endpoint, and the size of the persistent dedup store.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}

/// Handle tool call dispatch
pub async fn handle_tool_call(
    config: &ServerConfig,
    tool_name: &str,
    arguments: &Value,
) -> Result<ToolResult, JsonRpcError> {
    match tool_name {
        "crawl_images" => tool_crawl(config, arguments).await,
        "crawl_status" => tool_status(config),
        _ => Err(JsonRpcError::invalid_params(format!(
            "Unknown tool: {}",
            tool_name
        ))),
    }
}

async fn tool_crawl(config: &ServerConfig, args: &Value) -> Result<ToolResult, JsonRpcError> {
    let query = args
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| JsonRpcError::invalid_params("Missing query parameter"))?;

    let max_results = args
        .get("max_results")
        .and_then(|v| v.as_u64())
        .unwrap_or(10) as usize;
    let min_score = args.get("min_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let concurrency = args
        .get("concurrency")
        .and_then(|v| v.as_u64())
        .unwrap_or(4) as usize;
    let download_dir = args
        .get("download_dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| config.download_dir.clone());

    let fetcher = Arc::new(
        HttpFetcher::new(config.fetch.clone())
            .map_err(|e| JsonRpcError::server_error(e.to_string()))?,
    );
    let source = WebSearchSource::new(Arc::clone(&fetcher), config.search.clone(), query);

    let mut pipeline = Pipeline::new(fetcher);
    if let Some(path) = &config.seen_path {
        let store = FileSeenStore::open(path)
            .map_err(|e| JsonRpcError::server_error(e.to_string()))?;
        pipeline = pipeline.with_seen_store(Box::new(store));
    }

    let options = RunOptions {
        max_results,
        min_score,
        concurrency_limit: concurrency,
        download_dir,
        ..RunOptions::default()
    };
    let (ctx, _cancel) = RunContext::new(query, options);

    let manifest = pipeline
        .run(source, ctx)
        .await
        .map_err(|e| JsonRpcError::server_error(e.to_string()))?;

    let report = serde_json::to_string_pretty(&manifest)
        .map_err(|e| JsonRpcError::server_error(e.to_string()))?;
    Ok(ToolResult::text(report))
}

fn tool_status(config: &ServerConfig) -> Result<ToolResult, JsonRpcError> {
    let persisted_hashes = match &config.seen_path {
        Some(path) => FileSeenStore::open(path)
            .map(|store| store.hash_count())
            .unwrap_or(0),
        None => 0,
    };

    let status = json!({
        "version": crate::VERSION,
        "downloadDir": config.download_dir.to_string_lossy(),
        "searchEndpoint": config.search.endpoint,
        "persistentDedup": config.seen_path.is_some(),
        "persistedHashes": persisted_hashes,
    });

    let report = serde_json::to_string_pretty(&status)
        .map_err(|e| JsonRpcError::server_error(e.to_string()))?;
    Ok(ToolResult::text(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions() {
        let tools = get_tool_definitions();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "crawl_images");
        assert_eq!(
            tools[0].input_schema["required"],
            serde_json::json!(["query"])
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let config = ServerConfig::default();
        let result = handle_tool_call(&config, "no_such_tool", &json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_crawl_requires_query() {
        let config = ServerConfig::default();
        let result = handle_tool_call(&config, "crawl_images", &json!({})).await;
        let err = result.err().unwrap();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn test_status_reports_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            download_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };

        let result = handle_tool_call(&config, "crawl_status", &json!({}))
            .await
            .unwrap();
        let text = &result.content[0].text;
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["version"], crate::VERSION);
        assert_eq!(parsed["persistentDedup"], false);
    }
}

//! imgharvest MCP Server
//!
//! A Model Context Protocol (MCP) server that exposes the image acquisition
//! pipeline to AI agents over stdio transport.
//!
//! ## Usage
//!
//! ```bash
//! # Start with the default download directory
//! imgharvest-mcp
//!
//! # Custom download directory and persistent cross-run dedup
//! imgharvest-mcp --download-dir ./images --seen-store ~/.cache/imgharvest/seen.json
//!
//! # Enable verbose logging (stderr)
//! imgharvest-mcp --verbose
//! ```
//!
//! ## Available Tools
//!
//! - **crawl_images**: search, score, dedup, and download images for a keyword
//! - **crawl_status**: server configuration and dedup-store state

use anyhow::Result;
use clap::Parser;
use imgharvest::mcp::{McpServer, ServerConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// imgharvest MCP Server - expose image acquisition to AI agents
#[derive(Parser, Debug)]
#[command(name = "imgharvest-mcp")]
#[command(
    author,
    version,
    about = "imgharvest MCP Server - Model Context Protocol interface for image acquisition"
)]
struct Args {
    /// Directory downloaded images are saved into
    #[arg(long, short = 'o', env = "IMGHARVEST_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// SearxNG-compatible search endpoint
    #[arg(long, env = "IMGHARVEST_SEARCH_ENDPOINT")]
    search_endpoint: Option<String>,

    /// JSON file for cross-run dedup state; omitted = per-run dedup only
    #[arg(long, env = "IMGHARVEST_SEEN_STORE")]
    seen_store: Option<PathBuf>,

    /// Enable verbose logging (outputs to stderr)
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging goes to stderr, stdout carries the MCP protocol
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("error")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = ServerConfig::default();
    if let Some(dir) = args.download_dir {
        config.download_dir = dir;
    }
    if let Some(endpoint) = args.search_endpoint {
        config.search.endpoint = endpoint;
    }
    config.seen_path = args.seen_store;

    std::fs::create_dir_all(&config.download_dir)?;

    tracing::info!(
        "starting imgharvest MCP server, downloads -> {}",
        config.download_dir.display()
    );

    let server = McpServer::new(config);
    server.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["imgharvest-mcp"]).unwrap();
        assert!(args.download_dir.is_none());
        assert!(!args.verbose);

        let args = Args::try_parse_from([
            "imgharvest-mcp",
            "--download-dir",
            "/tmp/images",
            "-v",
        ])
        .unwrap();
        assert_eq!(args.download_dir, Some(PathBuf::from("/tmp/images")));
        assert!(args.verbose);
    }

    #[test]
    fn test_seen_store_flag() {
        let args =
            Args::try_parse_from(["imgharvest-mcp", "--seen-store", "/tmp/seen.json"]).unwrap();
        assert_eq!(args.seen_store, Some(PathBuf::from("/tmp/seen.json")));
    }
}

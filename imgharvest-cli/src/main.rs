//! imgharvest CLI - run image acquisition from the command line

use anyhow::Result;
use clap::{Parser, Subcommand};
use imgharvest::dedup::FileSeenStore;
use imgharvest::fetch::{FetchConfig, HttpFetcher};
use imgharvest::manifest::Manifest;
use imgharvest::mcp::{McpServer, ServerConfig};
use imgharvest::pipeline::{Pipeline, RunContext, RunOptions};
use imgharvest::source::{SearchConfig, WebSearchSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "imgharvest")]
#[command(
    author,
    version,
    about = "Keyword-driven image search, scoring, and download"
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, score, and download images for a keyword
    Crawl {
        /// Search keyword
        keyword: String,

        /// Maximum candidates to consider
        #[arg(long, short = 'n', default_value = "10")]
        max_results: usize,

        /// Minimum relevance score in [0, 1]
        #[arg(long, default_value = "0.0")]
        min_score: f64,

        /// Maximum downloads in flight at once
        #[arg(long, short = 'c', default_value = "4")]
        concurrency: usize,

        /// Directory to save images into
        #[arg(long, short = 'o', env = "IMGHARVEST_DOWNLOAD_DIR")]
        download_dir: Option<PathBuf>,

        /// SearxNG-compatible search endpoint
        #[arg(long, env = "IMGHARVEST_SEARCH_ENDPOINT")]
        endpoint: Option<String>,

        /// JSON file for cross-run dedup state
        #[arg(long, env = "IMGHARVEST_SEEN_STORE")]
        seen_store: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run the MCP server on stdio
    Mcp {
        /// Directory downloaded images are saved into
        #[arg(long, short = 'o', env = "IMGHARVEST_DOWNLOAD_DIR")]
        download_dir: Option<PathBuf>,

        /// JSON file for cross-run dedup state
        #[arg(long, env = "IMGHARVEST_SEEN_STORE")]
        seen_store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Crawl {
            keyword,
            max_results,
            min_score,
            concurrency,
            download_dir,
            endpoint,
            seen_store,
            format,
        } => {
            let mut search = SearchConfig::default();
            if let Some(endpoint) = endpoint {
                search.endpoint = endpoint;
            }

            let fetcher = Arc::new(HttpFetcher::new(FetchConfig::default())?);
            let source = WebSearchSource::new(Arc::clone(&fetcher), search, keyword.as_str());

            let mut pipeline = Pipeline::new(fetcher);
            if let Some(path) = seen_store {
                pipeline = pipeline.with_seen_store(Box::new(FileSeenStore::open(path)?));
            }

            let options = RunOptions {
                max_results,
                min_score,
                concurrency_limit: concurrency,
                download_dir: download_dir.unwrap_or_else(imgharvest::default_download_dir),
                ..RunOptions::default()
            };
            let (ctx, cancel) = RunContext::new(keyword.as_str(), options);

            // Ctrl-C degrades to a partial run instead of killing the process
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing in-flight downloads");
                    cancel.cancel();
                }
            });

            let manifest = pipeline.run(source, ctx).await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&manifest)?),
                _ => print_report(&manifest),
            }
        }

        Commands::Mcp {
            download_dir,
            seen_store,
        } => {
            let mut config = ServerConfig::default();
            if let Some(dir) = download_dir {
                config.download_dir = dir;
            }
            config.seen_path = seen_store;
            std::fs::create_dir_all(&config.download_dir)?;

            McpServer::new(config).run().await?;
        }
    }

    Ok(())
}

fn print_report(manifest: &Manifest) {
    println!("keyword: {}", manifest.keyword);
    for entry in &manifest.entries {
        let score = entry
            .score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        match &entry.local_path {
            Some(path) => println!("  [{}] {} {} -> {}", entry.status.label(), score, entry.url, path),
            None => println!("  [{}] {} {}", entry.status.label(), score, entry.url),
        }
    }
    println!(
        "done in {} ms: {} saved, {} duplicate, {} low-score, {} failed{}",
        manifest.elapsed_ms,
        manifest.counts.saved,
        manifest.counts.skipped_duplicate,
        manifest.counts.skipped_low_score,
        manifest.counts.failed,
        if manifest.cancelled { " (cancelled)" } else { "" }
    );
}

//! MCP server for imgharvest
//!
//! Exposes the acquisition pipeline to AI agents over the Model Context
//! Protocol (JSON-RPC 2.0 on stdio). Two tools are served:
//!
//! - `crawl_images`: run a full search -> score -> dedup -> download pass
//!   for a keyword and return the Manifest
//! - `crawl_status`: report server configuration and dedup-store state
//!
//! The transport is deliberately thin: it translates tool calls into
//! pipeline runs and relays the Manifest back, nothing more.

pub mod protocol;
pub mod server;
pub mod tools;

pub use server::{McpServer, ServerConfig};

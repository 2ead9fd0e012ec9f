//! # imgharvest
//!
//! Keyword-driven image acquisition: search an external source, score the
//! candidates, deduplicate, and download a bounded-concurrency subset.
//!
//! imgharvest provides:
//! - **Source query adapter** - lazy candidate stream from a web search
//! - **Metadata scorer** - deterministic relevance scoring in [0, 1]
//! - **Two-phase dedup** - URL level before download, SHA-256 after
//! - **Acquisition pipeline** - bounded worker pool with cancellation
//! - **MCP server** - tool surface for AI agent integration
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use imgharvest::fetch::{FetchConfig, HttpFetcher};
//! use imgharvest::pipeline::{Pipeline, RunContext, RunOptions};
//! use imgharvest::source::{SearchConfig, WebSearchSource};
//! use std::sync::Arc;
//!
//! let fetcher = Arc::new(HttpFetcher::new(FetchConfig::default())?);
//! let source = WebSearchSource::new(fetcher.clone(), SearchConfig::default(), "radiograph");
//!
//! let (ctx, _cancel) = RunContext::new("radiograph", RunOptions::default());
//! let mut pipeline = Pipeline::new(fetcher);
//! let manifest = pipeline.run(source, ctx).await?;
//! println!("saved {} images", manifest.counts.saved);
//! ```

pub mod dedup;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod mcp;
pub mod pipeline;
pub mod scorer;
pub mod source;

// Re-exports for convenience
pub use error::{Error, Result};
pub use manifest::{Candidate, EntryStatus, Manifest, ManifestEntry};
pub use pipeline::{Pipeline, RunContext, RunOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default download directory
pub fn default_download_dir() -> std::path::PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("imgharvest")
}

/// Pick a file extension for downloaded bytes.
///
/// The server-declared content type wins; the URL path extension is the
/// fallback, and `jpg` the default. Untrusted metadata never reaches the
/// filename beyond this sanitized extension.
///
/// # Examples
/// ```
/// use imgharvest::extension_for;
///
/// assert_eq!(extension_for(Some("image/png"), "https://x/y"), "png");
/// assert_eq!(extension_for(None, "https://x/photo.WEBP"), "webp");
/// assert_eq!(extension_for(None, "https://x/render/abc"), "jpg");
/// ```
pub fn extension_for(content_type: Option<&str>, url: &str) -> String {
    if let Some(ct) = content_type {
        // Strip any ";charset=..." suffix
        let essence = ct.split(';').next().unwrap_or(ct).trim();
        match essence {
            "image/jpeg" => return "jpg".to_string(),
            "image/png" => return "png".to_string(),
            "image/webp" => return "webp".to_string(),
            "image/gif" => return "gif".to_string(),
            "image/bmp" => return "bmp".to_string(),
            _ => {
                if let Some(exts) = mime_guess::get_mime_extensions_str(essence) {
                    if let Some(ext) = exts.first() {
                        return (*ext).to_string();
                    }
                }
            }
        }
    }

    // Fall back to the URL path extension when it looks sane
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some((_, ext)) = parsed.path().rsplit_once('.') {
            if (1..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return ext.to_ascii_lowercase();
            }
        }
    }

    "jpg".to_string()
}

/// Collision-safe filename for saved bytes, derived from the content hash.
///
/// # Examples
/// ```
/// use imgharvest::safe_filename;
///
/// let name = safe_filename("0123456789abcdef0123456789abcdef", "png");
/// assert_eq!(name, "img_0123456789ab.png");
/// ```
pub fn safe_filename(content_hash: &str, ext: &str) -> String {
    let prefix: String = content_hash.chars().take(12).collect();
    format!("img_{}.{}", prefix, ext)
}

//! Run data model: candidates going in, the Manifest coming out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Well-known candidate metadata keys
pub mod meta {
    /// Alt text attached to the image tag
    pub const ALT: &str = "alt";
    /// Zero-based rank assigned by the search provider
    pub const RANK: &str = "rank";
    /// Declared pixel width
    pub const WIDTH: &str = "width";
    /// Declared pixel height
    pub const HEIGHT: &str = "height";
    /// Content type reported by a probe or the search provider
    pub const CONTENT_TYPE: &str = "content_type";
    /// Content length in bytes reported by a probe
    pub const CONTENT_LENGTH: &str = "content_length";
    /// Title of the page the image was found on
    pub const PAGE_TITLE: &str = "page_title";
}

/// An unverified, unscored image reference returned by a search.
///
/// Created by the source adapter, scored by the scorer, consumed by the
/// pipeline. `source_url` is unique within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// URL of the image itself
    pub source_url: String,
    /// The keyword that produced this candidate
    pub origin_query: String,
    /// Page the image was discovered on, sent as Referer when downloading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Scalar metadata available at discovery time
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Relevance score in [0, 1], set once by the scorer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Candidate {
    /// Create a candidate with empty metadata
    pub fn new(source_url: impl Into<String>, origin_query: impl Into<String>) -> Self {
        Candidate {
            source_url: source_url.into(),
            origin_query: origin_query.into(),
            referer: None,
            metadata: BTreeMap::new(),
            score: None,
        }
    }

    /// Set a metadata entry, builder style
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Read a metadata entry as a string
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Read a metadata entry as an integer
    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.as_i64())
    }
}

/// Terminal status of a manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum EntryStatus {
    /// Downloaded, verified, and written to the download directory
    Saved,
    /// Suppressed by URL-level or content-hash dedup
    SkippedDuplicate,
    /// Score fell below the run's min_score threshold
    SkippedLowScore,
    /// Download attempted and failed; the reason is recorded, never raised
    Failed(String),
}

impl EntryStatus {
    /// Short lowercase label, used in logs and text reports
    pub fn label(&self) -> &'static str {
        match self {
            EntryStatus::Saved => "saved",
            EntryStatus::SkippedDuplicate => "skipped_duplicate",
            EntryStatus::SkippedLowScore => "skipped_low_score",
            EntryStatus::Failed(_) => "failed",
        }
    }
}

/// One candidate's final outcome. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Source URL of the candidate
    pub url: String,
    /// Final score, if the candidate reached the scoring stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Terminal status
    pub status: EntryStatus,
    /// Path of the saved file (status == saved only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// SHA-256 of the downloaded bytes (hex), when a download completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Decoded pixel width of the saved image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Decoded pixel height of the saved image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Counts by terminal status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCounts {
    pub saved: usize,
    pub skipped_duplicate: usize,
    pub skipped_low_score: usize,
    pub failed: usize,
}

/// The final, immutable report of a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Keyword the run was invoked with
    pub keyword: String,
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    /// Elapsed run time in milliseconds
    pub elapsed_ms: u64,
    /// Number of score-time probes issued (accounted separately from downloads)
    pub probes: usize,
    /// Whether the run was cancelled before completing normally
    pub cancelled: bool,
    /// Counts by status
    pub counts: ManifestCounts,
    /// One entry per candidate that entered filtering
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Recompute `counts` from `entries`
    pub fn tally(entries: &[ManifestEntry]) -> ManifestCounts {
        let mut counts = ManifestCounts::default();
        for entry in entries {
            match entry.status {
                EntryStatus::Saved => counts.saved += 1,
                EntryStatus::SkippedDuplicate => counts.skipped_duplicate += 1,
                EntryStatus::SkippedLowScore => counts.skipped_low_score += 1,
                EntryStatus::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }
}

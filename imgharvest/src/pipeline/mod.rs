//! Acquisition pipeline
//!
//! Orchestrates source -> scorer -> dedup -> bounded downloads and produces
//! the run's [`Manifest`]. Stages advance strictly forward:
//! Querying -> Scoring -> Filtering -> Downloading -> Finalizing -> Done.
//!
//! Per-candidate download failures are recorded in the Manifest and never
//! abort the run; the pipeline is fatal only on invalid configuration or
//! when the source fails before producing a single candidate.

use crate::dedup::{content_hash, MemorySeenStore, SeenStore};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::manifest::{meta, Candidate, EntryStatus, Manifest, ManifestEntry};
use crate::scorer::{CandidateScorer, MetadataScorer};
use crate::source::ImageSource;
use crate::{extension_for, safe_filename};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Pipeline stages, in order. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Querying,
    Scoring,
    Filtering,
    Downloading,
    Finalizing,
    Done,
}

fn transition(stage: &mut Stage, next: Stage) {
    tracing::debug!("pipeline stage {:?} -> {:?}", stage, next);
    *stage = next;
}

/// Per-run configuration
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop querying once this many candidates are collected
    pub max_results: usize,
    /// Candidates scoring below this are skipped, in [0, 1]
    pub min_score: f64,
    /// Bound on in-flight downloads
    pub concurrency_limit: usize,
    /// Directory saved files are written to
    pub download_dir: PathBuf,
    /// Issue a HEAD probe per candidate before scoring
    pub probe: bool,
    /// Bodies smaller than this are rejected as non-images
    pub min_image_bytes: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            max_results: 10,
            min_score: 0.0,
            concurrency_limit: 4,
            download_dir: crate::default_download_dir(),
            probe: true,
            min_image_bytes: 1024,
        }
    }
}

impl RunOptions {
    /// Reject bad configuration before any network activity
    pub fn validate(&self, keyword: &str) -> Result<()> {
        if keyword.trim().is_empty() {
            return Err(Error::InvalidConfig("keyword must be non-empty".into()));
        }
        if self.max_results == 0 {
            return Err(Error::InvalidConfig("max_results must be >= 1".into()));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::InvalidConfig(
                "concurrency_limit must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::InvalidConfig(format!(
                "min_score must be in [0, 1], got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// Cancels a running pipeline. Queued downloads are dropped, in-flight ones
/// finish or time out, and the run finalizes with partial results.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Per-invocation context: keyword, options, and the cancellation signal.
/// Owned by the pipeline for the run's duration.
#[derive(Debug)]
pub struct RunContext {
    pub keyword: String,
    pub options: RunOptions,
    cancel: watch::Receiver<bool>,
}

impl RunContext {
    pub fn new(keyword: impl Into<String>, options: RunOptions) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            RunContext {
                keyword: keyword.into(),
                options,
                cancel: rx,
            },
            CancelHandle { tx: Arc::new(tx) },
        )
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// The acquisition pipeline. Holds the scorer and the dedup store; the
/// dedup store is mutated only here, never by download workers.
pub struct Pipeline<F: Fetcher> {
    fetcher: Arc<F>,
    scorer: Box<dyn CandidateScorer>,
    seen: Box<dyn SeenStore>,
}

impl<F: Fetcher> Pipeline<F> {
    /// Pipeline with the default scorer and an in-memory seen store
    pub fn new(fetcher: Arc<F>) -> Self {
        Pipeline {
            fetcher,
            scorer: Box::new(MetadataScorer::default()),
            seen: Box::new(MemorySeenStore::new()),
        }
    }

    /// Replace the scoring policy
    pub fn with_scorer(mut self, scorer: Box<dyn CandidateScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Replace the dedup store (e.g. a persistent one for cross-run dedup)
    pub fn with_seen_store(mut self, seen: Box<dyn SeenStore>) -> Self {
        self.seen = seen;
        self
    }

    /// Run a crawl to completion and return the Manifest.
    ///
    /// The caller always receives a Manifest (possibly empty) unless a
    /// fatal error occurred before any candidate was produced.
    pub async fn run<S: ImageSource>(&mut self, mut source: S, ctx: RunContext) -> Result<Manifest> {
        ctx.options.validate(&ctx.keyword)?;

        let started_at = Utc::now();
        let start = Instant::now();
        let mut stage = Stage::Querying;

        // Querying: collect up to max_results, enforcing URL uniqueness
        // within the run
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut run_urls: HashSet<String> = HashSet::new();
        while candidates.len() < ctx.options.max_results {
            if ctx.is_cancelled() {
                tracing::info!("cancelled during querying");
                break;
            }
            match source.next().await {
                Ok(Some(candidate)) => {
                    if run_urls.insert(candidate.source_url.clone()) {
                        candidates.push(candidate);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if candidates.is_empty() {
                        return Err(e);
                    }
                    tracing::warn!(
                        "source failed after {} candidates, continuing with partial set: {}",
                        candidates.len(),
                        e
                    );
                    break;
                }
            }
        }
        tracing::info!("collected {} candidates for {:?}", candidates.len(), ctx.keyword);

        // Scoring: optional HEAD probe merged into metadata, then the pure
        // scorer. Probes are accounted separately from downloads.
        transition(&mut stage, Stage::Scoring);
        let mut probes = 0usize;
        for candidate in &mut candidates {
            if ctx.options.probe && !ctx.is_cancelled() {
                probes += 1;
                match self.fetcher.probe(&candidate.source_url).await {
                    Ok(probe) => {
                        if let Some(ct) = probe.content_type {
                            candidate
                                .metadata
                                .insert(meta::CONTENT_TYPE.to_string(), ct.into());
                        }
                        if let Some(len) = probe.content_length {
                            candidate
                                .metadata
                                .insert(meta::CONTENT_LENGTH.to_string(), len.into());
                        }
                    }
                    Err(e) => {
                        tracing::debug!("probe failed for {}: {}", candidate.source_url, e);
                    }
                }
            }
            candidate.score = Some(self.scorer.score(candidate));
        }

        // Filtering: min_score gate, then provisional URL-level dedup.
        // Every candidate reaching this point gets a manifest slot.
        transition(&mut stage, Stage::Filtering);
        let mut slots: Vec<Option<ManifestEntry>> = vec![None; candidates.len()];
        let mut queued: Vec<usize> = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let score = candidate.score.unwrap_or(0.0);
            if score < ctx.options.min_score {
                slots[i] = Some(make_entry(candidate, EntryStatus::SkippedLowScore));
            } else if !self.seen.insert_url(&candidate.source_url) {
                slots[i] = Some(make_entry(candidate, EntryStatus::SkippedDuplicate));
            } else {
                queued.push(i);
            }
        }

        // Downloading: bounded worker pool. A candidate's score is final
        // before it is queued here.
        transition(&mut stage, Stage::Downloading);
        if !queued.is_empty() {
            std::fs::create_dir_all(&ctx.options.download_dir)?;
        }
        let semaphore = Arc::new(Semaphore::new(ctx.options.concurrency_limit));
        let nonce = format!("{}-{}", std::process::id(), started_at.timestamp_millis());
        let mut join_set: JoinSet<DownloadOutcome> = JoinSet::new();

        for &i in &queued {
            let candidate = &candidates[i];
            let task = DownloadTask {
                index: i,
                url: candidate.source_url.clone(),
                referer: candidate.referer.clone(),
                dir: ctx.options.download_dir.clone(),
                min_bytes: ctx.options.min_image_bytes,
                nonce: nonce.clone(),
            };
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let cancel = ctx.cancel.clone();
            join_set.spawn(download_one(fetcher, semaphore, cancel, task));
        }

        // Single writer for the hash set: outcomes are applied here as
        // workers complete, never inside the workers themselves.
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("download task aborted: {}", e);
                    continue;
                }
            };
            let candidate = &candidates[outcome.index];
            let status = match outcome.result {
                TaskResult::Fetched { temp, hash, format, width, height } => {
                    if !self.seen.insert_hash(&hash) {
                        // Late duplicate: drop the temp file
                        tracing::debug!("content duplicate for {}", candidate.source_url);
                        slots[outcome.index] =
                            Some(make_entry(candidate, EntryStatus::SkippedDuplicate));
                        continue;
                    }
                    // Extension follows the verified bytes, not the header
                    let ext = extension_for(Some(format.to_mime_type()), &candidate.source_url);
                    let final_path = ctx.options.download_dir.join(safe_filename(&hash, &ext));
                    match std::fs::rename(temp.into_path(), &final_path) {
                        Ok(()) => {
                            tracing::info!("saved {} -> {}", candidate.source_url, final_path.display());
                            let mut entry = make_entry(candidate, EntryStatus::Saved);
                            entry.local_path = Some(final_path.to_string_lossy().to_string());
                            entry.content_hash = Some(hash);
                            entry.width = Some(width);
                            entry.height = Some(height);
                            slots[outcome.index] = Some(entry);
                            continue;
                        }
                        Err(e) => EntryStatus::Failed(format!("rename failed: {}", e)),
                    }
                }
                TaskResult::Failed(reason) => {
                    tracing::warn!("download failed for {}: {}", candidate.source_url, reason);
                    EntryStatus::Failed(reason)
                }
                TaskResult::Cancelled => EntryStatus::Failed("cancelled".into()),
            };
            slots[outcome.index] = Some(make_entry(candidate, status));
        }

        // Finalizing: persist dedup state, assemble the immutable Manifest
        transition(&mut stage, Stage::Finalizing);
        self.seen.persist()?;

        let entries: Vec<ManifestEntry> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    make_entry(
                        &candidates[i],
                        EntryStatus::Failed("download task aborted".into()),
                    )
                })
            })
            .collect();

        let counts = Manifest::tally(&entries);
        let manifest = Manifest {
            keyword: ctx.keyword.clone(),
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            probes,
            cancelled: ctx.is_cancelled(),
            counts,
            entries,
        };

        transition(&mut stage, Stage::Done);
        tracing::info!(
            "run for {:?} done: {} saved, {} duplicate, {} low-score, {} failed",
            ctx.keyword,
            manifest.counts.saved,
            manifest.counts.skipped_duplicate,
            manifest.counts.skipped_low_score,
            manifest.counts.failed
        );
        Ok(manifest)
    }
}

fn make_entry(candidate: &Candidate, status: EntryStatus) -> ManifestEntry {
    ManifestEntry {
        url: candidate.source_url.clone(),
        score: candidate.score,
        status,
        local_path: None,
        content_hash: None,
        width: None,
        height: None,
    }
}

struct DownloadTask {
    index: usize,
    url: String,
    referer: Option<String>,
    dir: PathBuf,
    min_bytes: u64,
    nonce: String,
}

struct DownloadOutcome {
    index: usize,
    result: TaskResult,
}

enum TaskResult {
    /// Bytes landed in a temp file, verified and hashed, not yet deduped
    Fetched {
        temp: TempFile,
        hash: String,
        format: image::ImageFormat,
        width: u32,
        height: u32,
    },
    Failed(String),
    Cancelled,
}

/// Temp file removed on drop unless promoted via [`TempFile::into_path`].
/// Guarantees no orphaned partial downloads on any failure path.
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        TempFile { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn into_path(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn download_one<F: Fetcher>(
    fetcher: Arc<F>,
    semaphore: Arc<Semaphore>,
    cancel: watch::Receiver<bool>,
    task: DownloadTask,
) -> DownloadOutcome {
    let index = task.index;
    let result = download_inner(fetcher, semaphore, cancel, task).await;
    DownloadOutcome { index, result }
}

async fn download_inner<F: Fetcher>(
    fetcher: Arc<F>,
    semaphore: Arc<Semaphore>,
    cancel: watch::Receiver<bool>,
    task: DownloadTask,
) -> TaskResult {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return TaskResult::Failed("worker pool closed".into()),
    };

    // Queued downloads are dropped on cancellation; anything past this
    // point is in-flight and allowed to finish
    if *cancel.borrow() {
        return TaskResult::Cancelled;
    }

    let fetched = match fetcher.fetch(&task.url, task.referer.as_deref()).await {
        Ok(fetched) => fetched,
        Err(e) => return TaskResult::Failed(e.to_string()),
    };

    if let Some(ct) = &fetched.content_type {
        let essence = ct.split(';').next().unwrap_or(ct).trim();
        if !essence.starts_with("image/") {
            return TaskResult::Failed(format!("content-type mismatch: {}", essence));
        }
    }

    if (fetched.bytes.len() as u64) < task.min_bytes {
        return TaskResult::Failed(format!(
            "undersized body: {} bytes (min {})",
            fetched.bytes.len(),
            task.min_bytes
        ));
    }

    // Declared content type is advisory; the bytes must decode as an image
    let (format, width, height) = match verify_image(&fetched.bytes) {
        Ok(verified) => verified,
        Err(reason) => return TaskResult::Failed(reason),
    };

    let hash = content_hash(&fetched.bytes);
    let temp = TempFile::new(task.dir.join(format!(".dl-{}-{}.part", task.nonce, task.index)));
    if let Err(e) = std::fs::write(temp.path(), &fetched.bytes) {
        return TaskResult::Failed(format!("write failed: {}", e));
    }

    TaskResult::Fetched {
        temp,
        hash,
        format,
        width,
        height,
    }
}

/// Decode the image header: yields the actual format and pixel dimensions,
/// or an error message when the bytes are not a known image format.
fn verify_image(bytes: &[u8]) -> std::result::Result<(image::ImageFormat, u32, u32), String> {
    let reader = match image::ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format() {
        Ok(reader) => reader,
        Err(e) => return Err(format!("image sniff failed: {}", e)),
    };
    let format = match reader.format() {
        Some(format) => format,
        None => return Err("not an image: unrecognized bytes".to_string()),
    };
    match reader.into_dimensions() {
        Ok((width, height)) => Ok((format, width, height)),
        Err(e) => Err(format!("image decode failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_keyword() {
        let options = RunOptions::default();
        assert!(matches!(
            options.validate(""),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            options.validate("   "),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut options = RunOptions::default();
        options.concurrency_limit = 0;
        assert!(options.validate("cats").is_err());

        let mut options = RunOptions::default();
        options.max_results = 0;
        assert!(options.validate("cats").is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_min_score() {
        let mut options = RunOptions::default();
        options.min_score = 1.5;
        assert!(options.validate("cats").is_err());

        options.min_score = f64::NAN;
        assert!(options.validate("cats").is_err());

        options.min_score = 0.5;
        assert!(options.validate("cats").is_ok());
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.part");
        std::fs::write(&path, b"bytes").unwrap();

        {
            let _temp = TempFile::new(path.clone());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_file_kept_when_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.part");
        std::fs::write(&path, b"bytes").unwrap();

        let temp = TempFile::new(path.clone());
        let promoted = temp.into_path();
        assert_eq!(promoted, path);
        assert!(path.exists());
    }

    #[test]
    fn test_verify_image_reads_format_and_dimensions() {
        // GIF header with a 4x3 logical screen and no color table
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[4, 0, 3, 0, 0x00, 0x00, 0x00]);
        bytes.resize(64, 0);

        let (format, width, height) = verify_image(&bytes).unwrap();
        assert_eq!(format, image::ImageFormat::Gif);
        assert_eq!((width, height), (4, 3));
    }

    #[test]
    fn test_verify_image_rejects_non_image_bytes() {
        let err = verify_image(b"<html><body>definitely not pixels</body></html>").unwrap_err();
        assert!(err.contains("not an image"), "got {}", err);
    }

    #[test]
    fn test_cancel_handle_flips_context() {
        let (ctx, handle) = RunContext::new("cats", RunOptions::default());
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
    }
}

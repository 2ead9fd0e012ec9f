//! Deduplication
//!
//! Two-phase: a cheap URL-level check before download and an authoritative
//! content-hash check after. The seen-set is injected as a [`SeenStore`]
//! rather than held in a hidden global, so a run can use a throwaway
//! in-memory set while cross-run dedup plugs in a persistent store.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Run- or process-scoped memory of what has already been seen.
///
/// `insert_*` returns `false` when the value was already present. Mutation
/// is serialized by the pipeline (single-writer discipline): workers never
/// touch the store directly.
pub trait SeenStore: Send {
    fn insert_url(&mut self, url: &str) -> bool;
    fn insert_hash(&mut self, hash: &str) -> bool;
    fn contains_hash(&self, hash: &str) -> bool;
    /// Number of content hashes remembered
    fn hash_count(&self) -> usize;
    /// Flush to backing storage, if any
    fn persist(&mut self) -> Result<()>;
}

/// In-memory store, discarded at run end. The default.
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    urls: HashSet<String>,
    hashes: HashSet<String>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeenStore for MemorySeenStore {
    fn insert_url(&mut self, url: &str) -> bool {
        self.urls.insert(url.to_string())
    }

    fn insert_hash(&mut self, hash: &str) -> bool {
        self.hashes.insert(hash.to_string())
    }

    fn contains_hash(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    fn hash_count(&self) -> usize {
        self.hashes.len()
    }

    fn persist(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeenFile {
    #[serde(default)]
    urls: HashSet<String>,
    #[serde(default)]
    hashes: HashSet<String>,
}

/// JSON-file-backed store for opt-in cross-run dedup
#[derive(Debug)]
pub struct FileSeenStore {
    path: PathBuf,
    state: SeenFile,
    dirty: bool,
}

impl FileSeenStore {
    /// Open the store, loading prior state if the file exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SeenFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(FileSeenStore {
            path,
            state,
            dirty: false,
        })
    }
}

impl SeenStore for FileSeenStore {
    fn insert_url(&mut self, url: &str) -> bool {
        let inserted = self.state.urls.insert(url.to_string());
        self.dirty |= inserted;
        inserted
    }

    fn insert_hash(&mut self, hash: &str) -> bool {
        let inserted = self.state.hashes.insert(hash.to_string());
        self.dirty |= inserted;
        inserted
    }

    fn contains_hash(&self, hash: &str) -> bool {
        self.state.hashes.contains(hash)
    }

    fn hash_count(&self) -> usize {
        self.state.hashes.len()
    }

    fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&self.state)?;
        // Write-then-rename so a crash mid-write cannot corrupt the store
        let staging = self.path.with_extension("json.part");
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

/// SHA-256 of content, lowercase hex
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

//! Version-tagged symbol tree cache

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::model::SymbolTree;
use crate::error::Result;

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheMetrics {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to fetch
    pub misses: u64,
    /// Invalidation calls
    pub invalidations: u64,
    /// Trees currently stored
    pub entries: usize,
}

impl CacheMetrics {
    /// Hits as a percentage of all lookups
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Symbol trees keyed by document URI, each valid for one document version.
///
/// A second table maps workspace symbol queries to the files they named;
/// any invalidation clears it.
#[derive(Default)]
pub struct SymbolCache {
    entries: RwLock<HashMap<String, Arc<SymbolTree>>>,
    workspace: RwLock<HashMap<String, Arc<Vec<PathBuf>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl SymbolCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree for `uri` at `version`, calling `fetch` on a miss.
    ///
    /// `fetch` runs without any lock held and must produce a tree for
    /// `version`. When two fetches race, the higher version stays stored and
    /// on equal versions the first stored tree is returned to both.
    pub fn get_or_fetch<F>(&self, uri: &str, version: i32, fetch: F) -> Result<Arc<SymbolTree>>
    where
        F: FnOnce() -> Result<SymbolTree>,
    {
        let cached = self
            .entries
            .read()
            .get(uri)
            .filter(|tree| tree.version == version)
            .cloned();
        if let Some(tree) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(uri = %uri, version, "Symbol cache hit");
            return Ok(tree);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(uri = %uri, version, "Symbol cache miss");
        let fresh = Arc::new(fetch()?);

        let mut entries = self.entries.write();
        match entries.get(uri) {
            Some(stored) if stored.version == fresh.version => Ok(Arc::clone(stored)),
            Some(stored) if stored.version > fresh.version => Ok(fresh),
            _ => {
                entries.insert(uri.to_string(), Arc::clone(&fresh));
                Ok(fresh)
            }
        }
    }

    /// Stored tree for `uri`, whatever its version
    pub fn peek(&self, uri: &str) -> Option<Arc<SymbolTree>> {
        self.entries.read().get(uri).cloned()
    }

    /// Drop the tree of one document
    pub fn invalidate(&self, uri: &str) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.entries.write().remove(uri);
        self.workspace.write().clear();
        debug!(uri = %uri, "Invalidated symbol cache entry");
    }

    /// Drop everything
    pub fn invalidate_all(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.entries.write().clear();
        self.workspace.write().clear();
        debug!("Invalidated symbol cache");
    }

    /// Files a workspace symbol query named, if cached
    pub fn workspace_get(&self, query: &str) -> Option<Arc<Vec<PathBuf>>> {
        let found = self.workspace.read().get(query).cloned();
        match found {
            Some(files) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(files)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remember the files a workspace symbol query named
    pub fn workspace_put(&self, query: &str, files: Vec<PathBuf>) -> Arc<Vec<PathBuf>> {
        let files = Arc::new(files);
        self.workspace
            .write()
            .insert(query.to_string(), Arc::clone(&files));
        files
    }

    /// Snapshot of the counters
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }
}

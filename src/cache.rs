//! Incremental document cache.
//!
//! One JSON entry per root file, keyed by the root's path. An entry records
//! a SHA-256 of every file in the root's import closure as it was when the
//! document was produced, plus a hash of the options it was compiled with.
//! It is only served while all of them still match.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::CompileOptions;
use crate::context::CompileContext;
use crate::error::{CompileResult, CompilerError, E_IO};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub options_hash: String,
    /// Content hash per file of the import closure, root included.
    pub files: BTreeMap<PathBuf, String>,
    pub document: String,
}

pub struct IncrementalCache {
    cache_dir: PathBuf,
}

impl IncrementalCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> CompileResult<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).map_err(|e| {
            CompilerError::new(
                E_IO,
                &format!("Failed to create cache directory: {}", e),
                &cache_dir.display().to_string(),
                0,
                0,
            )
        })?;
        Ok(Self { cache_dir })
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn hash_options(options: &CompileOptions) -> Option<String> {
        serde_json::to_string(options).ok().map(|s| Self::compute_hash(&s))
    }

    fn hash_file(path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| Self::compute_hash(&s))
    }

    fn entry_path(&self, root: &Path) -> PathBuf {
        // Hashing the path gives a flat, collision-free file name.
        let key = Self::compute_hash(&root.display().to_string());
        self.cache_dir.join(format!("{}.json", &key[..32]))
    }

    /// Cached document for `root` under `options`, if neither the options nor
    /// any file it was built from has changed. Stale entries are dropped.
    pub fn get(&self, root: &Path, options: &CompileOptions) -> Option<String> {
        let entry_path = self.entry_path(root);
        let data = fs::read_to_string(&entry_path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(e) => e,
            Err(e) => {
                warn!(file = %root.display(), error = %e, "corrupt cache entry, discarding");
                fs::remove_file(&entry_path).ok();
                return None;
            }
        };

        if Self::hash_options(options).as_deref() != Some(entry.options_hash.as_str()) {
            debug!(root = %root.display(), "cache miss, options changed");
            self.invalidate(root);
            return None;
        }

        let stale = entry
            .files
            .iter()
            .find(|(path, hash)| Self::hash_file(path).as_deref() != Some(hash.as_str()));
        if let Some((path, _)) = stale {
            debug!(root = %root.display(), changed = %path.display(), "cache miss");
            self.invalidate(root);
            return None;
        }

        debug!(root = %root.display(), "cache hit");
        Some(entry.document)
    }

    /// Store `document` for `root`, fingerprinting the closure recorded in `ctx`.
    /// `options` are the caller's, before any `use` directive changed them.
    pub fn set(&self, root: &Path, options: &CompileOptions, ctx: &CompileContext, document: &str) {
        let Some(options_hash) = Self::hash_options(options) else {
            return;
        };
        let mut files = BTreeMap::new();
        let closure = std::iter::once(root).chain(ctx.imports().imported().keys().map(PathBuf::as_path));
        for path in closure {
            match Self::hash_file(path) {
                Some(hash) => {
                    files.insert(path.to_path_buf(), hash);
                }
                // Unreadable now means we cannot validate later either.
                None => return,
            }
        }

        let entry = CacheEntry {
            options_hash,
            files,
            document: document.to_string(),
        };
        match serde_json::to_string(&entry) {
            Ok(data) => {
                if let Err(e) = fs::write(self.entry_path(root), data) {
                    warn!(file = %root.display(), error = %e, "failed to write cache entry");
                }
            }
            Err(e) => warn!(file = %root.display(), error = %e, "failed to serialize cache entry"),
        }
    }

    pub fn invalidate(&self, root: &Path) {
        fs::remove_file(self.entry_path(root)).ok();
    }
}

//! Atomic staging of cache entries and single-flight population.
//!
//! Entries are written into a hidden sibling of their final location and
//! renamed into place once complete. Readers therefore see either no entry
//! or a complete one. If another process wins the rename, the losing copy is
//! discarded and the winner's entry is used.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::future::Cache;
use tracing::debug;

use crate::{ResolverError, Result};

/// Upper bound on concurrently tracked populations.
const DEFAULT_INFLIGHT_MAX: u64 = 10_000;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Create `path` and any missing parents.
///
/// Succeeds if the directory already exists, including when a concurrent
/// caller created it first.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(ResolverError::io(
            format!("creating directory {}", path.display()),
            e,
        )),
    }
}

/// Outcome of committing a staged entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Our staged copy is now the entry.
    Installed,
    /// Another writer installed the entry first; our copy was discarded.
    AlreadyPresent,
}

/// A cache entry being written next to its final location.
#[derive(Debug)]
pub struct StagedEntry {
    staging: PathBuf,
    target: PathBuf,
    is_dir: bool,
}

impl StagedEntry {
    /// Stage a directory entry (e.g. an HTTP cache shard).
    pub async fn dir(target: &Path) -> Result<Self> {
        let staging = staging_sibling(target)?;
        if let Some(parent) = target.parent() {
            ensure_dir(parent).await?;
        }
        tokio::fs::create_dir(&staging).await.map_err(|e| {
            ResolverError::io(format!("creating staging directory {}", staging.display()), e)
        })?;
        Ok(Self {
            staging,
            target: target.to_path_buf(),
            is_dir: true,
        })
    }

    /// Stage a single file. The staging file itself is created by the writer.
    pub async fn file(target: &Path) -> Result<Self> {
        let staging = staging_sibling(target)?;
        if let Some(parent) = target.parent() {
            ensure_dir(parent).await?;
        }
        Ok(Self {
            staging,
            target: target.to_path_buf(),
            is_dir: false,
        })
    }

    /// Where to write the entry's contents.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged entry into place.
    pub async fn commit(self) -> Result<Commit> {
        match tokio::fs::rename(&self.staging, &self.target).await {
            Ok(()) => Ok(Commit::Installed),
            Err(e) => {
                let present = tokio::fs::try_exists(&self.target).await.unwrap_or(false);
                self.discard().await;
                if present {
                    debug!(path = %self.target.display(), "cache entry installed by another writer");
                    Ok(Commit::AlreadyPresent)
                } else {
                    Err(ResolverError::io(
                        format!("installing cache entry {}", self.target.display()),
                        e,
                    ))
                }
            }
        }
    }

    /// Remove the staged copy, ignoring failures.
    pub async fn discard(&self) {
        let removed = if self.is_dir {
            tokio::fs::remove_dir_all(&self.staging).await
        } else {
            tokio::fs::remove_file(&self.staging).await
        };
        if let Err(e) = removed {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %self.staging.display(), error = %e, "failed to remove staging copy");
            }
        }
    }
}

/// Hidden, process-unique sibling of `target`.
fn staging_sibling(target: &Path) -> Result<PathBuf> {
    let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
        return Err(ResolverError::Io {
            context: format!("staging {}", target.display()),
            message: "cache entry path has no parent".to_string(),
        });
    };
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(parent.join(format!(
        ".{}.staging.{}.{seq}",
        name.to_string_lossy(),
        std::process::id()
    )))
}

/// Single-flight table for cache population.
///
/// Concurrent callers populating the same key await one shared attempt and
/// all observe its result. Keys are dropped as soon as the attempt settles;
/// later callers are expected to find the entry on disk.
pub struct Inflight {
    entries: Cache<String, PathBuf>,
}

impl Inflight {
    pub fn new() -> Self {
        Self {
            entries: Cache::new(DEFAULT_INFLIGHT_MAX),
        }
    }

    /// Run `populate` for `key` unless an attempt is already in flight.
    pub async fn run<F>(&self, key: &str, populate: F) -> Result<PathBuf>
    where
        F: Future<Output = Result<PathBuf>>,
    {
        let result = self.entries.try_get_with(key.to_string(), populate).await;
        self.entries.invalidate(key).await;
        result.map_err(Arc::unwrap_or_clone)
    }
}

impl Default for Inflight {
    fn default() -> Self {
        Self::new()
    }
}

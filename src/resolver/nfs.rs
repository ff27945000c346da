//! Network-filesystem caching strategy.
//!
//! Source images live on mounted network storage. The first `resolve` copies
//! the image into a local cache that mirrors the source layout; later calls
//! read the local copy.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ResolvedImage, Resolver, finish};
use crate::cache::{Inflight, StagedEntry};
use crate::config::SourceCacheConfig;
use crate::format::FormatInference;
use crate::{ResolverError, Result, ident, telemetry};

const NAME: &str = "source_image_caching";

/// Caching resolver over a mounted source tree.
pub struct NetworkFsResolver {
    source_root: PathBuf,
    cache_root: PathBuf,
    format: FormatInference,
    inflight: Inflight,
}

impl NetworkFsResolver {
    pub fn new(source_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            cache_root: cache_root.into(),
            format: FormatInference::new(),
            inflight: Inflight::new(),
        }
    }

    pub fn from_config(config: &SourceCacheConfig) -> Result<Self> {
        let Some(cache_root) = &config.cache_root else {
            return Err(ResolverError::Misconfigured(
                "Missing setting for cache_root.".to_string(),
            ));
        };
        let Some(source_root) = &config.source_root else {
            return Err(ResolverError::Misconfigured(
                "Missing setting for source_root.".to_string(),
            ));
        };
        Ok(Self::new(source_root, cache_root))
    }

    /// Source and cache locations for a percent-encoded identifier.
    fn paths(&self, ident: &str) -> Result<(PathBuf, PathBuf)> {
        let decoded = ident::decode(ident)?;
        let relative = ident::relative_path(&decoded)
            .ok_or_else(|| ResolverError::source_not_found(ident))?;
        Ok((
            self.source_root.join(&relative),
            self.cache_root.join(&relative),
        ))
    }

    /// Copy `source` into the cache unless a concurrent population already
    /// installed it.
    async fn copy_to_cache(&self, source: &Path, cached: &Path) -> Result<PathBuf> {
        if tokio::fs::try_exists(cached).await.unwrap_or(false) {
            debug!(path = %cached.display(), "cached copy appeared while waiting to populate");
            return Ok(cached.to_path_buf());
        }
        let started = Instant::now();
        let result = async {
            let staged = StagedEntry::file(cached).await?;
            if let Err(e) = tokio::fs::copy(source, staged.path()).await {
                staged.discard().await;
                return Err(ResolverError::io(
                    format!("copying {} to cache", source.display()),
                    e,
                ));
            }
            staged.commit().await?;
            Ok(cached.to_path_buf())
        }
        .await;
        telemetry::record_fetch(NAME, &result, started.elapsed());

        if result.is_ok() {
            info!(
                source = %source.display(),
                path = %cached.display(),
                "copied source image to cache"
            );
        }
        result
    }

    async fn resolve_cached(&self, ident: &str) -> Result<ResolvedImage> {
        let (source, cached) = self.paths(ident)?;

        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(ResolverError::not_found_with_detail(
                format!("Source image not found for identifier: {ident}."),
                format!(
                    "Source image not found at {} for identifier: {ident}.",
                    source.display()
                ),
            ));
        }

        let decoded = ident::decode(ident)?;
        let format = self.format.infer(&decoded, None)?;

        if tokio::fs::try_exists(&cached).await.unwrap_or(false) {
            telemetry::record_cache_hit(NAME);
        } else {
            telemetry::record_cache_miss(NAME);
            self.inflight
                .run(&decoded, self.copy_to_cache(&source, &cached))
                .await?;
        }
        debug!(path = %cached.display(), %format, "image served from local cache");

        Ok(ResolvedImage {
            path: cached,
            format,
        })
    }
}

#[async_trait]
impl Resolver for NetworkFsResolver {
    fn name(&self) -> &str {
        NAME
    }

    async fn is_resolvable(&self, ident: &str) -> bool {
        match self.paths(ident) {
            Ok((source, _)) => tokio::fs::try_exists(source).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn resolve(&self, ident: &str) -> Result<ResolvedImage> {
        finish(NAME, ident, self.resolve_cached(ident).await)
    }
}

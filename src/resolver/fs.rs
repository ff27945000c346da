//! Filesystem strategies: resolve directly against ordered source roots.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ResolvedImage, Resolver, finish};
use crate::config::{FsConfig, source_roots};
use crate::format::FormatInference;
use crate::ident;
use crate::{ResolverError, Result};

/// Ordered list of source directories. The first root containing a path wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoots(Vec<PathBuf>);

impl SourceRoots {
    pub fn new(roots: Vec<PathBuf>) -> Result<Self> {
        if roots.is_empty() {
            return Err(ResolverError::Misconfigured(
                "At least one source root is required.".to_string(),
            ));
        }
        Ok(Self(roots))
    }

    /// First `<root>/<relative>` that exists.
    pub async fn find(&self, relative: &Path) -> Option<PathBuf> {
        for root in &self.0 {
            let candidate = root.join(relative);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.0.iter()
    }
}

/// Read-only resolver over local or mounted directories.
///
/// The identifier, once percent-decoded, is a path relative to each root;
/// its extension is the format.
pub struct FsResolver {
    name: &'static str,
    roots: SourceRoots,
    format: FormatInference,
}

impl FsResolver {
    pub fn new(roots: SourceRoots) -> Self {
        Self {
            name: "simple_fs",
            roots,
            format: FormatInference::new(),
        }
    }

    /// Rewrite extensions through an alias table (e.g. `jpeg` → `jpg`).
    pub fn with_extension_map(
        mut self,
        extension_map: std::collections::HashMap<String, String>,
    ) -> Self {
        self.name = "extension_normalizing_fs";
        self.format = self.format.with_extension_map(extension_map);
        self
    }

    pub fn from_config(config: &FsConfig) -> Result<Self> {
        let roots = SourceRoots::new(source_roots(&config.src_img_root, &config.src_img_roots)?)?;
        Ok(Self::new(roots))
    }

    /// Extension-normalizing variant; `extension_map` is required.
    pub fn extension_normalizing(config: &FsConfig) -> Result<Self> {
        let Some(extension_map) = config.extension_map.clone() else {
            return Err(ResolverError::Misconfigured(
                "Missing setting for extension_map.".to_string(),
            ));
        };
        Ok(Self::from_config(config)?.with_extension_map(extension_map))
    }

    /// Existing source file for a percent-encoded identifier.
    pub async fn source_file_path(&self, ident: &str) -> Result<Option<PathBuf>> {
        let decoded = ident::decode(ident)?;
        let Some(relative) = ident::relative_path(&decoded) else {
            return Ok(None);
        };
        Ok(self.roots.find(&relative).await)
    }

    async fn resolve_source(&self, ident: &str) -> Result<ResolvedImage> {
        let Some(path) = self.source_file_path(ident).await? else {
            return Err(ResolverError::source_not_found(ident));
        };
        debug!(path = %path.display(), "src image");

        let decoded = ident::decode(ident)?;
        let format = self.format.infer(&decoded, None)?;
        debug!(%format, "src format");

        Ok(ResolvedImage { path, format })
    }
}

#[async_trait]
impl Resolver for FsResolver {
    fn name(&self) -> &str {
        self.name
    }

    async fn is_resolvable(&self, ident: &str) -> bool {
        matches!(self.source_file_path(ident).await, Ok(Some(_)))
    }

    async fn resolve(&self, ident: &str) -> Result<ResolvedImage> {
        finish(self.name, ident, self.resolve_source(ident).await)
    }
}

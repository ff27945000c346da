//! Resolution strategies.
//!
//! Every strategy implements [`Resolver`]. The HTTP strategies share one
//! caching pipeline ([`CachingHttpResolver`]) and differ only in the
//! [`SourceLocator`] that turns an identifier into a request:
//!
//! | Strategy | Type | Source of bytes |
//! |----------|------|-----------------|
//! | `simple_fs` / `extension_normalizing_fs` | [`FsResolver`] | ordered local roots |
//! | `simple_http` | [`CachingHttpResolver`] + [`PrefixLocator`] | HTTP origin, cached |
//! | `template_http` | [`CachingHttpResolver`] + [`TemplateLocator`] | many HTTP origins, cached |
//! | `source_image_caching` | [`NetworkFsResolver`] | mounted storage, cached |
//! | `metadata_fs` | [`MetadataResolver`] | search index + local roots |

pub mod fs;
pub mod http;
pub mod metadata;
pub mod nfs;
pub mod request;
pub mod template;

pub use fs::{FsResolver, SourceRoots};
pub use http::{CachingHttpResolver, PrefixLocator, SourceLocator};
pub use metadata::MetadataResolver;
pub use nfs::NetworkFsResolver;
pub use request::{Credentials, RequestOptions, RequestOverrides, SourceRequest};
pub use template::{Template, TemplateLocator};

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::{Result, telemetry};

/// A located source image, ready for decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedImage {
    /// Local file holding the source bytes.
    pub path: PathBuf,
    /// Lowercase format token, e.g. `jpg`, `tif`, `jp2`.
    pub format: String,
}

impl ResolvedImage {
    pub fn new(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
        }
    }
}

/// Maps identifiers to local source images.
///
/// `resolve` succeeds whenever the immediately preceding `is_resolvable`
/// call for the same identifier returned true, modulo changes to external
/// state in between. Identifiers are passed percent-encoded, exactly as they
/// appear in the request path.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Strategy name for logging and metric labels.
    fn name(&self) -> &str;

    /// Cheap existence probe. May be lighter than a full resolve
    /// (e.g. a HEAD instead of a GET) and never fails.
    async fn is_resolvable(&self, ident: &str) -> bool;

    /// Locate the source image, staging a local copy if needed.
    async fn resolve(&self, ident: &str) -> Result<ResolvedImage>;
}

/// Record the outcome of a resolve and log not-found details.
pub(crate) fn finish(
    resolver: &str,
    ident: &str,
    result: Result<ResolvedImage>,
) -> Result<ResolvedImage> {
    telemetry::record_resolve(resolver, &result);
    if let Err(e) = &result {
        warn!(resolver, ident, detail = %e.detail(), "failed to resolve identifier");
    }
    result
}

//! HTTP caching strategy.
//!
//! Source images live on an HTTP origin (e.g. Fedora Commons). The first
//! `resolve` for an identifier fetches the image into the local cache; later
//! calls are answered from disk without any network traffic.
//!
//! The pipeline is shared by the simple and template strategies; only the
//! [`SourceLocator`] differs.
//!
//! # Probing vs. population
//!
//! With `head_resolvable`, `is_resolvable` issues a HEAD while population
//! issues a GET. Origins are not required to answer both consistently, so a
//! HEAD failure followed by a GET success (or the reverse) is possible and
//! surfaces as-is.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::request::{PreparedClient, RequestOptions, SourceRequest};
use super::{ResolvedImage, Resolver, finish};
use crate::cache::{CACHE_FILE_STEM, Inflight, StagedEntry, cache_file_name, cache_subroot};
use crate::config::HttpConfig;
use crate::format::FormatInference;
use crate::{ResolverError, Result, ident, telemetry};

/// Turns a decoded identifier into an outbound request.
pub trait SourceLocator: Send + Sync {
    /// `None` means the identifier cannot name anything on the origin; the
    /// caller treats it as not found without touching the network.
    fn locate(&self, ident: &str) -> Option<SourceRequest>;
}

/// `source_prefix + ident + source_suffix`, or the identifier itself when it
/// is a URL and `uri_resolvable` is set.
pub struct PrefixLocator {
    source_prefix: String,
    source_suffix: String,
    uri_resolvable: bool,
    client: PreparedClient,
}

impl PrefixLocator {
    pub fn new(
        source_prefix: impl Into<String>,
        source_suffix: impl Into<String>,
        uri_resolvable: bool,
        client: PreparedClient,
    ) -> Self {
        Self {
            source_prefix: source_prefix.into(),
            source_suffix: source_suffix.into(),
            uri_resolvable,
            client,
        }
    }
}

impl SourceLocator for PrefixLocator {
    fn locate(&self, ident: &str) -> Option<SourceRequest> {
        let url = if self.uri_resolvable && ident::is_url(ident) {
            ident.to_string()
        } else {
            format!("{}{ident}{}", self.source_prefix, self.source_suffix)
        };
        Some(self.client.request(url))
    }
}

/// Settings of the caching pipeline that do not depend on the locator.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub cache_root: PathBuf,
    pub head_resolvable: bool,
    pub ident_regex: Option<Regex>,
    pub format: FormatInference,
}

impl CacheSettings {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            head_resolvable: false,
            ident_regex: None,
            format: FormatInference::new(),
        }
    }

    /// Validated settings from configuration.
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let Some(cache_root) = &config.cache_root else {
            return Err(ResolverError::Misconfigured(
                "Missing setting for cache_root.".to_string(),
            ));
        };
        let ident_regex = config
            .ident_regex
            .as_deref()
            .map(compile_ident_regex)
            .transpose()?;
        Ok(Self {
            cache_root: cache_root.clone(),
            head_resolvable: config.head_resolvable,
            ident_regex,
            format: FormatInference::new().with_default_format(config.default_format.clone()),
        })
    }
}

/// Compile an identifier filter that must match at the start of the identifier.
pub fn compile_ident_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})"))
        .map_err(|e| ResolverError::Misconfigured(format!("Invalid ident_regex {pattern:?}: {e}")))
}

/// Caching resolver over an HTTP origin.
pub struct CachingHttpResolver {
    name: &'static str,
    locator: Box<dyn SourceLocator>,
    settings: CacheSettings,
    inflight: Inflight,
}

impl CachingHttpResolver {
    pub fn new(
        name: &'static str,
        locator: Box<dyn SourceLocator>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            name,
            locator,
            settings,
            inflight: Inflight::new(),
        }
    }

    /// Prefix/suffix URL assembly.
    ///
    /// Requires `cache_root`, and either `uri_resolvable` or a `source_prefix`.
    pub fn simple(config: &HttpConfig) -> Result<Self> {
        let settings = CacheSettings::from_config(config)?;
        if !config.uri_resolvable && config.source_prefix.is_empty() {
            return Err(ResolverError::Misconfigured(
                "Must either set uri_resolvable or source_prefix settings.".to_string(),
            ));
        }
        let options = RequestOptions::from_overrides(&config.request_overrides());
        let locator = PrefixLocator::new(
            config.source_prefix.clone(),
            config.source_suffix.clone(),
            config.uri_resolvable,
            PreparedClient::new(&options, config.timeout())?,
        );
        Ok(Self::new("simple_http", Box::new(locator), settings))
    }

    /// Cache entry directory for a decoded identifier.
    pub fn cache_dir_path(&self, ident: &str) -> PathBuf {
        self.settings.cache_root.join(cache_subroot(ident))
    }

    pub async fn in_cache(&self, ident: &str) -> bool {
        tokio::fs::try_exists(self.cache_dir_path(ident))
            .await
            .unwrap_or(false)
    }

    fn matches_ident_regex(&self, ident: &str) -> bool {
        self.settings
            .ident_regex
            .as_ref()
            .is_none_or(|regex| regex.is_match(ident))
    }

    /// Staged `loris_cache.*` file inside an entry directory.
    async fn cached_object(&self, ident: &str, entry_dir: &Path) -> Result<PathBuf> {
        let public = format!("Image not found for identifier: {ident}.");
        let read_error = |e: std::io::Error| {
            ResolverError::not_found_with_detail(
                public.clone(),
                format!(
                    "Failed to read cache entry {} for identifier: {ident}: {e}",
                    entry_dir.display()
                ),
            )
        };
        let mut entries = tokio::fs::read_dir(entry_dir).await.map_err(read_error)?;
        let prefix = format!("{CACHE_FILE_STEM}.");
        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            ResolverError::not_found_with_detail(
                public.clone(),
                format!(
                    "No cached source image in {} for identifier: {ident}.",
                    entry_dir.display()
                ),
            )
        })
    }

    /// Populate the entry for `ident`. Runs inside the single-flight table,
    /// so an entry committed since the caller's own check is reused.
    async fn copy_to_cache(&self, ident: &str) -> Result<PathBuf> {
        if self.in_cache(ident).await {
            debug!(ident, "cache entry appeared while waiting to populate");
            return Ok(self.cache_dir_path(ident));
        }
        let Some(request) = self.locator.locate(ident) else {
            return Err(ResolverError::not_found(format!(
                "Image not found for identifier: {ident}."
            )));
        };
        debug!(url = %request.url, "src image");

        let started = Instant::now();
        let result = self.fetch_into_cache(ident, &request).await;
        telemetry::record_fetch(self.name, &result, started.elapsed());
        result
    }

    async fn fetch_into_cache(&self, ident: &str, request: &SourceRequest) -> Result<PathBuf> {
        let mut response = request
            .get()
            .send()
            .await
            .map_err(|e| fetch_error(ident, &request.url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::not_found_with_detail(
                format!(
                    "Source image not found for identifier: {ident}. Status code returned: {}",
                    status.as_u16()
                ),
                format!(
                    "Source image not found at {} for identifier: {ident}. Status code returned: {}",
                    request.url,
                    status.as_u16()
                ),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let extension = self
            .settings
            .format
            .infer_from_content_type(ident, content_type.as_deref())?;
        debug!(%extension, "src extension");

        let entry_dir = self.cache_dir_path(ident);
        let staged = StagedEntry::dir(&entry_dir).await?;
        let file_name = cache_file_name(&extension);
        let target = staged.path().join(&file_name);
        if let Err(e) = write_body(&mut response, &target, ident, &request.url).await {
            staged.discard().await;
            return Err(e);
        }
        staged.commit().await?;

        info!(
            url = %request.url,
            path = %entry_dir.join(&file_name).display(),
            "copied source image to cache"
        );
        Ok(entry_dir)
    }

    async fn resolve_cached(&self, raw_ident: &str) -> Result<ResolvedImage> {
        let ident = ident::decode(raw_ident)?;
        if !self.matches_ident_regex(&ident) {
            return Err(ResolverError::not_found(format!(
                "Image not found for identifier: {ident}."
            )));
        }

        let entry_dir = self.cache_dir_path(&ident);
        if self.in_cache(&ident).await {
            telemetry::record_cache_hit(self.name);
        } else {
            telemetry::record_cache_miss(self.name);
            self.inflight.run(&ident, self.copy_to_cache(&ident)).await?;
        }

        let path = self.cached_object(&ident, &entry_dir).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = self.settings.format.infer(&file_name, None)?;
        debug!(path = %path.display(), "src image from local disk");

        Ok(ResolvedImage { path, format })
    }
}

/// Transport and URL errors are reported as not found.
fn fetch_error(ident: &str, url: &str, error: &reqwest::Error) -> ResolverError {
    if error.is_builder() {
        ResolverError::not_found_with_detail(
            format!("Bad URL request made for identifier: {ident}."),
            format!("Bad URL request at {url} for identifier: {ident}: {error}"),
        )
    } else {
        ResolverError::not_found_with_detail(
            format!("Source image could not be retrieved for identifier: {ident}."),
            format!("Request to {url} failed for identifier: {ident}: {error}"),
        )
    }
}

async fn write_body(
    response: &mut reqwest::Response,
    path: &Path,
    ident: &str,
    url: &str,
) -> Result<()> {
    let io_error = |e: std::io::Error| ResolverError::io(format!("writing {}", path.display()), e);
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| fetch_error(ident, url, &e))?
    {
        file.write_all(&chunk).await.map_err(io_error)?;
    }
    file.flush().await.map_err(io_error)?;
    Ok(())
}

#[async_trait]
impl Resolver for CachingHttpResolver {
    fn name(&self) -> &str {
        self.name
    }

    async fn is_resolvable(&self, raw_ident: &str) -> bool {
        let Ok(ident) = ident::decode(raw_ident) else {
            return false;
        };
        if !self.matches_ident_regex(&ident) {
            return false;
        }
        if self.in_cache(&ident).await {
            return true;
        }
        let Some(request) = self.locator.locate(&ident) else {
            return false;
        };

        let probe = if self.settings.head_resolvable {
            request.head()
        } else {
            request.get()
        };
        match probe.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %request.url, error = %e, "existence probe failed");
                false
            }
        }
    }

    async fn resolve(&self, ident: &str) -> Result<ResolvedImage> {
        finish(self.name, ident, self.resolve_cached(ident).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cache_root: &Path) -> HttpConfig {
        HttpConfig {
            cache_root: Some(cache_root.to_path_buf()),
            source_prefix: "http://origin.example/fedora/".into(),
            source_suffix: "/datastreams/master/content".into(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_cache_root_is_misconfigured() {
        let err = CachingHttpResolver::simple(&HttpConfig {
            source_prefix: "http://origin/".into(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("cache_root"));
    }

    #[test]
    fn prefix_or_uri_resolvable_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let err = CachingHttpResolver::simple(&HttpConfig {
            cache_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ResolverError::Misconfigured(_)));

        assert!(
            CachingHttpResolver::simple(&HttpConfig {
                cache_root: Some(dir.path().to_path_buf()),
                uri_resolvable: true,
                ..Default::default()
            })
            .is_ok()
        );
    }

    #[test]
    fn invalid_ident_regex_is_misconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let err = CachingHttpResolver::simple(&HttpConfig {
            ident_regex: Some("(unclosed".into()),
            ..config(dir.path())
        })
        .err()
        .unwrap();
        assert!(matches!(err, ResolverError::Misconfigured(_)));
    }

    #[test]
    fn ident_regex_is_anchored_at_start() {
        let regex = compile_ident_regex(r"ns:\d+").unwrap();
        assert!(regex.is_match("ns:123"));
        assert!(regex.is_match("ns:123/extra"));
        assert!(!regex.is_match("other-ns:123"));
    }

    #[test]
    fn prefix_locator_assembles_urls() {
        let client = PreparedClient::new(&RequestOptions::default(), None).unwrap();
        let locator = PrefixLocator::new("http://origin/", ".jp2", false, client.clone());
        assert_eq!(locator.locate("abc").unwrap().url, "http://origin/abc.jp2");
        assert_eq!(
            locator.locate("http://elsewhere/x.jpg").unwrap().url,
            "http://origin/http://elsewhere/x.jpg.jp2"
        );

        let locator = PrefixLocator::new("http://origin/", "", true, client);
        assert_eq!(
            locator.locate("http://elsewhere/x.jpg").unwrap().url,
            "http://elsewhere/x.jpg"
        );
    }

    #[tokio::test]
    async fn cache_hit_needs_no_origin() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = CachingHttpResolver::simple(&config(dir.path())).unwrap();

        let entry = resolver.cache_dir_path("ns:1");
        std::fs::create_dir_all(&entry).unwrap();
        std::fs::write(entry.join("loris_cache.jp2"), b"jp2").unwrap();

        assert!(resolver.is_resolvable("ns:1").await);
        let resolved = resolver.resolve("ns%3A1").await.unwrap();
        assert_eq!(resolved, ResolvedImage::new(entry.join("loris_cache.jp2"), "jp2"));
    }

    #[tokio::test]
    async fn population_reuses_entry_committed_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        // unroutable origin: any request would fail the population
        let resolver = CachingHttpResolver::simple(&HttpConfig {
            cache_root: Some(dir.path().to_path_buf()),
            source_prefix: "nonsense-scheme:".into(),
            ..Default::default()
        })
        .unwrap();

        let entry = resolver.cache_dir_path("ns:3");
        std::fs::create_dir_all(&entry).unwrap();
        std::fs::write(entry.join("loris_cache.jp2"), b"winner").unwrap();

        assert_eq!(resolver.copy_to_cache("ns:3").await.unwrap(), entry);
        assert_eq!(std::fs::read(entry.join("loris_cache.jp2")).unwrap(), b"winner");
    }

    #[tokio::test]
    async fn unreadable_entry_reports_io_detail() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = CachingHttpResolver::simple(&config(dir.path())).unwrap();
        let entry = resolver.cache_dir_path("ns:4");
        std::fs::create_dir_all(entry.parent().unwrap()).unwrap();
        // a plain file where the entry directory should be
        std::fs::write(&entry, b"not a directory").unwrap();

        let err = resolver.resolve("ns:4").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.detail().contains("Failed to read cache entry"));
        assert!(!err.public_message().contains(&dir.path().display().to_string()));
    }

    #[tokio::test]
    async fn empty_entry_dir_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = CachingHttpResolver::simple(&config(dir.path())).unwrap();
        std::fs::create_dir_all(resolver.cache_dir_path("ns:2")).unwrap();

        let err = resolver.resolve("ns:2").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.detail().contains("No cached source image"));
        assert!(!err.public_message().contains(&dir.path().display().to_string()));
    }

    #[tokio::test]
    async fn unsupported_scheme_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = CachingHttpResolver::simple(&HttpConfig {
            cache_root: Some(dir.path().to_path_buf()),
            source_prefix: "nonsense-scheme:".into(),
            ..Default::default()
        })
        .unwrap();

        assert!(!resolver.is_resolvable("abc.jpg").await);
        let err = resolver.resolve("abc.jpg").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!resolver.in_cache("abc.jpg").await);
    }
}

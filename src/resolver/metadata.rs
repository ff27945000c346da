//! External-metadata strategy.
//!
//! Identifiers name a record rather than a path:
//! `collection-id/media-id/variant`. A search index maps them to a relative
//! location, which is then looked up under the ordered source roots.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::fs::SourceRoots;
use super::request::RequestOptions;
use super::{ResolvedImage, Resolver, finish};
use crate::config::{MetadataConfig, source_roots};
use crate::format::FormatInference;
use crate::{ResolverError, Result, ident, telemetry};

const NAME: &str = "metadata_fs";

pub const DEFAULT_LOCATION_SUFFIX: &str = "MediaLocation";

/// A parsed `collection/media/variant` identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaKey<'a> {
    pub collection: &'a str,
    pub media: &'a str,
    pub variant: &'a str,
}

impl<'a> MediaKey<'a> {
    /// Exactly three non-empty `/`-separated segments.
    pub fn parse(decoded: &'a str) -> Option<Self> {
        let mut segments = decoded.split('/');
        let key = Self {
            collection: segments.next()?,
            media: segments.next()?,
            variant: segments.next()?,
        };
        if segments.next().is_some()
            || key.collection.is_empty()
            || key.media.is_empty()
            || key.variant.is_empty()
        {
            return None;
        }
        Some(key)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: SearchResults,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<Map<String, Value>>,
}

/// Values of a stored field; single-valued fields come back as bare strings.
fn field_values(doc: &Map<String, Value>, field: &str) -> Vec<String> {
    match doc.get(field) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(value)) => vec![value.clone()],
        _ => Vec::new(),
    }
}

/// Location of `media` in a search body, from the first record that
/// references it.
fn location_from_response(body: &str, location_field: &str, media: &str) -> Option<String> {
    let parsed: SearchResponse = serde_json::from_str(body).ok()?;
    if parsed.response.num_found == 0 {
        return None;
    }
    parsed.response.docs.iter().find_map(|doc| {
        let position = field_values(doc, "mediaReference")
            .iter()
            .position(|reference| reference == media)?;
        field_values(doc, location_field).into_iter().nth(position)
    })
}

/// Resolver backed by a search index that maps media records to files.
pub struct MetadataResolver {
    index_url: String,
    location_suffix: String,
    roots: SourceRoots,
    client: Client,
    format: FormatInference,
}

impl MetadataResolver {
    pub fn new(index_url: impl Into<String>, roots: SourceRoots, client: Client) -> Self {
        Self {
            index_url: index_url.into(),
            location_suffix: DEFAULT_LOCATION_SUFFIX.to_string(),
            roots,
            client,
            format: FormatInference::new(),
        }
    }

    pub fn with_location_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.location_suffix = suffix.into();
        self
    }

    pub fn from_config(config: &MetadataConfig) -> Result<Self> {
        let Some(index_url) = &config.index_url else {
            return Err(ResolverError::Misconfigured(
                "Missing setting for index_url.".to_string(),
            ));
        };
        let roots = SourceRoots::new(source_roots(&config.src_img_root, &config.src_img_roots)?)?;
        let timeout = config.timeout_secs.map(std::time::Duration::from_secs);
        let client = RequestOptions::default().build_client(timeout)?;

        let mut resolver = Self::new(index_url.clone(), roots, client);
        if let Some(suffix) = &config.location_suffix {
            resolver = resolver.with_location_suffix(suffix.clone());
        }
        Ok(resolver)
    }

    /// Ask the index where `key` is stored.
    async fn lookup(&self, key: &MediaKey<'_>) -> Result<Option<String>> {
        let location_field = format!("{}{}", key.variant, self.location_suffix);
        let query = [
            (
                "q",
                format!("identifier:{} AND mediaReference:{}", key.collection, key.media),
            ),
            ("fl", format!("{location_field},mediaReference")),
            ("wt", "json".to_string()),
        ];

        let started = Instant::now();
        let result = async {
            let response = self
                .client
                .get(&self.index_url)
                .query(&query)
                .send()
                .await
                .map_err(|e| index_error(&self.index_url, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ResolverError::not_found_with_detail(
                    "Image metadata could not be retrieved.",
                    format!("Index {} answered {status}", self.index_url),
                ));
            }
            response
                .text()
                .await
                .map_err(|e| index_error(&self.index_url, e))
        }
        .await;
        telemetry::record_fetch(NAME, &result, started.elapsed());

        Ok(location_from_response(&result?, &location_field, key.media))
    }

    /// Existing source file for a percent-encoded identifier.
    pub async fn source_file_path(&self, ident: &str) -> Result<PathBuf> {
        let decoded = ident::decode(ident)?;
        let Some(key) = MediaKey::parse(&decoded) else {
            return Err(ResolverError::not_found_with_detail(
                format!("Source image not found for identifier: {ident}."),
                format!("Identifier {decoded} is not collection/media/variant"),
            ));
        };

        let Some(location) = self.lookup(&key).await? else {
            return Err(ResolverError::not_found_with_detail(
                format!("Source image not found for identifier: {ident}."),
                format!("No indexed location for {decoded} at {}", self.index_url),
            ));
        };
        debug!(%location, "indexed location");

        let relative = ident::relative_path(location.trim_start_matches('/'))
            .ok_or_else(|| ResolverError::source_not_found(ident))?;
        self.roots.find(&relative).await.ok_or_else(|| {
            ResolverError::not_found_with_detail(
                format!("Source image not found for identifier: {ident}."),
                format!("Indexed location {location} is not under any source root"),
            )
        })
    }

    async fn resolve_source(&self, ident: &str) -> Result<ResolvedImage> {
        let path = self.source_file_path(ident).await?;
        let format = self.format.infer(&path.to_string_lossy(), None)?;
        Ok(ResolvedImage { path, format })
    }
}

fn index_error(index_url: &str, e: reqwest::Error) -> ResolverError {
    ResolverError::not_found_with_detail(
        "Image metadata could not be retrieved.",
        format!("Index request to {index_url} failed: {e}"),
    )
}

#[async_trait]
impl Resolver for MetadataResolver {
    fn name(&self) -> &str {
        NAME
    }

    async fn is_resolvable(&self, ident: &str) -> bool {
        self.source_file_path(ident).await.is_ok()
    }

    async fn resolve(&self, ident: &str) -> Result<ResolvedImage> {
        finish(NAME, ident, self.resolve_source(ident).await)
    }
}

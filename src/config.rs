//! Resolver configuration.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. explicit path (e.g. `--config <path>`)
//! 2. `~/.loris/resolver.toml` (user)
//! 3. `/etc/loris/resolver.toml` (system)
//!
//! The file holds one `[resolver]` table whose `impl` key selects the
//! strategy:
//!
//! ```toml
//! [resolver]
//! impl = "template_http"
//! cache_root = "/var/cache/loris/src"
//! templates = "site1, site2"
//! delimiter = "|"
//!
//! [resolver.template.site1]
//! url = "https://images.example.edu/%s/master"
//! user = "loris"
//! pw = "secret"
//!
//! [resolver.template.site2]
//! url = "https://archive.example.org/%s/%s.jp2"
//! ssl_check = false
//! ```
//!
//! Configuration is validated once, when [`ResolverConfig::build`] constructs
//! the strategy; missing required keys fail with
//! [`ResolverError::Misconfigured`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error};

use crate::resolver::{
    CachingHttpResolver, FsResolver, MetadataResolver, NetworkFsResolver, RequestOverrides,
    Resolver,
};
use crate::{ResolverError, Result};

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub resolver: ResolverConfig,
}

/// Strategy selection plus its settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "impl", rename_all = "snake_case")]
pub enum ResolverConfig {
    SimpleFs(FsConfig),
    ExtensionNormalizingFs(FsConfig),
    SimpleHttp(HttpConfig),
    TemplateHttp(TemplateHttpConfig),
    SourceImageCaching(SourceCacheConfig),
    MetadataFs(MetadataConfig),
}

/// Filesystem strategies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FsConfig {
    #[serde(default)]
    pub src_img_root: Option<PathBuf>,
    /// Searched in order; takes precedence over `src_img_root`.
    #[serde(default)]
    pub src_img_roots: Option<Vec<PathBuf>>,
    /// Extension aliases, applied after lowercasing (`jpeg = "jpg"`).
    #[serde(default)]
    pub extension_map: Option<HashMap<String, String>>,
}

/// HTTP caching strategy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    /// URL up to the identifier.
    #[serde(default)]
    pub source_prefix: String,
    /// URL after the identifier.
    #[serde(default)]
    pub source_suffix: String,
    /// Overrides the content-type/extension derived format.
    #[serde(default)]
    pub default_format: Option<String>,
    /// Probe with HEAD instead of GET.
    #[serde(default)]
    pub head_resolvable: bool,
    /// Accept identifiers that are themselves `http(s)://` URLs.
    #[serde(default)]
    pub uri_resolvable: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pw: Option<String>,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub ssl_check: Option<bool>,
    /// Identifiers not matching at their start are rejected without a request.
    #[serde(default)]
    pub ident_regex: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl HttpConfig {
    pub fn request_overrides(&self) -> RequestOverrides {
        RequestOverrides {
            user: self.user.clone(),
            pw: self.pw.clone(),
            cert: self.cert.clone(),
            key: self.key.clone(),
            ssl_check: self.ssl_check,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Template dispatch strategy: HTTP settings plus named URL templates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateHttpConfig {
    #[serde(flatten)]
    pub http: HttpConfig,
    /// Active template names, in order.
    #[serde(default)]
    pub templates: Option<TemplateNames>,
    /// Splits the part after the prefix into several pattern fields.
    #[serde(default)]
    pub delimiter: Option<String>,
    /// Template sections keyed by name.
    #[serde(default)]
    pub template: BTreeMap<String, TemplateConfig>,
}

/// Template names as a list or a comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TemplateNames {
    List(Vec<String>),
    Csv(String),
}

impl TemplateNames {
    pub fn names(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Csv(names) => names.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// One URL template with optional request overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateConfig {
    /// Pattern with one `%s` per substituted field.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub overrides: RequestOverrides,
}

/// Network-filesystem caching strategy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceCacheConfig {
    #[serde(default)]
    pub source_root: Option<PathBuf>,
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
}

/// Search-index backed strategy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataConfig {
    /// Select endpoint of the search index.
    #[serde(default)]
    pub index_url: Option<String>,
    /// Appended to the variant to name the location field.
    #[serde(default)]
    pub location_suffix: Option<String>,
    #[serde(default)]
    pub src_img_root: Option<PathBuf>,
    #[serde(default)]
    pub src_img_roots: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ResolverConfig {
    /// Parse a `[resolver]` table from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ResolverError::Config(format!("Failed to parse resolver config: {e}")))?;
        Ok(config.resolver)
    }

    /// Validate this configuration and construct the strategy.
    pub fn build(&self) -> Result<Arc<dyn Resolver>> {
        let resolver = self.construct().inspect_err(|e| {
            error!(resolver = self.impl_name(), error = %e, "resolver misconfigured");
        })?;
        debug!(resolver = resolver.name(), "resolver constructed");
        Ok(resolver)
    }

    /// Configured `impl` name.
    pub fn impl_name(&self) -> &'static str {
        match self {
            Self::SimpleFs(_) => "simple_fs",
            Self::ExtensionNormalizingFs(_) => "extension_normalizing_fs",
            Self::SimpleHttp(_) => "simple_http",
            Self::TemplateHttp(_) => "template_http",
            Self::SourceImageCaching(_) => "source_image_caching",
            Self::MetadataFs(_) => "metadata_fs",
        }
    }

    fn construct(&self) -> Result<Arc<dyn Resolver>> {
        let resolver: Arc<dyn Resolver> = match self {
            Self::SimpleFs(config) => Arc::new(FsResolver::from_config(config)?),
            Self::ExtensionNormalizingFs(config) => {
                Arc::new(FsResolver::extension_normalizing(config)?)
            }
            Self::SimpleHttp(config) => Arc::new(CachingHttpResolver::simple(config)?),
            Self::TemplateHttp(config) => Arc::new(CachingHttpResolver::template(config)?),
            Self::SourceImageCaching(config) => Arc::new(NetworkFsResolver::from_config(config)?),
            Self::MetadataFs(config) => Arc::new(MetadataResolver::from_config(config)?),
        };
        Ok(resolver)
    }
}

impl Config {
    /// Load configuration from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ResolverError::Config(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ResolverError::Config(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(ResolverError::Config(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".loris").join("resolver.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/loris/resolver.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(ResolverError::Config(
            "No config file found. Create ~/.loris/resolver.toml or /etc/loris/resolver.toml"
                .to_string(),
        ))
    }
}

/// Source roots from the `src_img_root`/`src_img_roots` pair.
pub(crate) fn source_roots(
    root: &Option<PathBuf>,
    roots: &Option<Vec<PathBuf>>,
) -> Result<Vec<PathBuf>> {
    match (roots, root) {
        (Some(roots), _) if !roots.is_empty() => Ok(roots.clone()),
        (_, Some(root)) => Ok(vec![root.clone()]),
        _ => Err(ResolverError::Misconfigured(
            "Missing setting for src_img_root or src_img_roots.".to_string(),
        )),
    }
}

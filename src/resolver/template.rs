//! Template dispatch: one caching HTTP resolver serving many origins.
//!
//! Identifiers take the form `<template>:<rest>`. The prefix selects a URL
//! pattern and `rest` fills its `%s` placeholders, either whole or split on
//! the configured delimiter. Each template may override the generic
//! credentials and TLS verification.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use super::http::{CacheSettings, CachingHttpResolver, SourceLocator};
use super::request::{PreparedClient, RequestOptions, RequestOverrides, SourceRequest};
use crate::config::TemplateHttpConfig;
use crate::{ResolverError, Result};

/// A named URL pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Identifier prefix selecting this template.
    pub name: String,
    /// Pattern with one `%s` per field; `%%` is a literal percent sign.
    pub url: String,
    pub overrides: RequestOverrides,
}

impl Template {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            overrides: RequestOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: RequestOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Substitute `fields` into the `%s` placeholders of `pattern`.
///
/// Returns `None` unless the number of fields equals the number of
/// placeholders. Percent signs not followed by `s` or `%` are copied as-is,
/// so escaped URLs such as `%2F` survive.
///
/// ```rust
/// # use loris_resolver::resolver::template::fill_pattern;
/// assert_eq!(
///     fill_pattern("http://example/%s/%s.jp2", &["a", "b"]).as_deref(),
///     Some("http://example/a/b.jp2")
/// );
/// assert_eq!(fill_pattern("http://example/%s", &["a", "b"]), None);
/// ```
pub fn fill_pattern(pattern: &str, fields: &[&str]) -> Option<String> {
    let capacity = pattern.len() + fields.iter().map(|f| f.len()).sum::<usize>();
    let mut url = String::with_capacity(capacity);
    let mut fields = fields.iter();
    let mut rest = pattern;

    while let Some(pos) = rest.find('%') {
        url.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('s') {
            url.push_str(fields.next()?);
            rest = tail;
        } else if let Some(tail) = after.strip_prefix('%') {
            url.push('%');
            rest = tail;
        } else {
            url.push('%');
            rest = after;
        }
    }
    url.push_str(rest);

    if fields.next().is_some() {
        return None;
    }
    Some(url)
}

struct Route {
    template: Template,
    client: PreparedClient,
}

/// Prefix-keyed URL assembly.
pub struct TemplateLocator {
    routes: HashMap<String, Route>,
    delimiter: Option<String>,
}

impl TemplateLocator {
    /// Build one client per template from the generic options merged with
    /// the template's overrides.
    pub fn new(
        templates: Vec<Template>,
        generic: &RequestOptions,
        delimiter: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut routes = HashMap::with_capacity(templates.len());
        for template in templates {
            let options = generic.merged(&template.overrides);
            let client = PreparedClient::new(&options, timeout)?;
            routes.insert(template.name.clone(), Route { template, client });
        }
        Ok(Self { routes, delimiter })
    }

    /// Configured prefixes, sorted.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        prefixes.sort_unstable();
        prefixes
    }
}

impl SourceLocator for TemplateLocator {
    fn locate(&self, ident: &str) -> Option<SourceRequest> {
        // identifiers without a prefix (favicon.ico, ...) never resolve
        let (prefix, rest) = ident.split_once(':')?;
        let route = self.routes.get(prefix)?;

        let fields: Vec<&str> = match &self.delimiter {
            Some(delimiter) => rest.split(delimiter.as_str()).collect(),
            None => vec![rest],
        };
        match fill_pattern(&route.template.url, &fields) {
            Some(url) => Some(route.client.request(url)),
            None => {
                warn!(
                    template = prefix,
                    fields = fields.len(),
                    "identifier field count does not match template placeholders"
                );
                None
            }
        }
    }
}

impl CachingHttpResolver {
    /// Template dispatch over the caching pipeline.
    ///
    /// Identifiers are always allowed to be full URLs here, so no
    /// `source_prefix` is required. Templates listed without a section are
    /// skipped with a warning; a section without `url` is misconfigured.
    pub fn template(config: &TemplateHttpConfig) -> Result<Self> {
        let settings = CacheSettings::from_config(&config.http)?;
        let generic = RequestOptions::from_overrides(&config.http.request_overrides());

        let names = config
            .templates
            .as_ref()
            .map(|names| names.names())
            .unwrap_or_default();
        if names.is_empty() {
            warn!("No templates specified in configuration");
        }

        let mut templates = Vec::with_capacity(names.len());
        for name in names {
            let Some(section) = config.template.get(&name) else {
                warn!(template = %name, "No configuration specified for resolver template");
                continue;
            };
            let Some(url) = &section.url else {
                return Err(ResolverError::Misconfigured(format!(
                    "Missing url for resolver template {name}."
                )));
            };
            templates.push(
                Template::new(name, url.clone()).with_overrides(section.overrides.clone()),
            );
        }

        let locator = TemplateLocator::new(
            templates,
            &generic,
            config.delimiter.clone(),
            config.http.timeout(),
        )?;
        debug!(templates = ?locator.prefixes(), "template resolver configured");
        Ok(Self::new("template_http", Box::new(locator), settings))
    }
}

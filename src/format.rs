//! Format inference for resolved source images.
//!
//! A format token is chosen with fixed precedence:
//!
//! 1. the deployment override (`default_format`),
//! 2. a format supplied by the caller, usually derived from an HTTP
//!    `Content-Type` through [`format_for_media_type`],
//! 3. the trailing extension of the identifier or staged file name, accepted
//!    only when it is at most five characters long including the dot.
//!
//! Tokens are always lowercase. An optional alias table rewrites extensions
//! (e.g. `jpeg` → `jpg`) after case folding.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{ResolverError, Result};

/// Longest accepted extension, counting the separator.
const MAX_EXTENSION_LEN: usize = 5;

/// Media types the resolver recognizes in origin responses.
pub const FORMATS_BY_MEDIA_TYPE: &[(&str, &str)] = &[
    ("image/gif", "gif"),
    ("image/jp2", "jp2"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/tiff", "tif"),
    ("image/webp", "webp"),
];

/// Look up the format for a `Content-Type` header value.
///
/// Parameters such as `; charset=binary` are ignored.
pub fn format_for_media_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim();
    FORMATS_BY_MEDIA_TYPE
        .iter()
        .find(|(media_type, _)| media_type.eq_ignore_ascii_case(essence))
        .map(|(_, format)| *format)
}

/// Trailing extension of the last path component of `name`, without the dot.
///
/// ```rust
/// # use loris_resolver::format::trailing_extension;
/// assert_eq!(trailing_extension("a/b/c.jp2"), Some("jp2"));
/// assert_eq!(trailing_extension("a.b/c"), None);
/// assert_eq!(trailing_extension("scan.tiff2000"), None);
/// ```
pub fn trailing_extension(name: &str) -> Option<&str> {
    let last = name.rsplit('/').next().unwrap_or(name);
    let dot = last.rfind('.')?;
    let extension = &last[dot + 1..];
    if extension.is_empty() || last.len() - dot > MAX_EXTENSION_LEN {
        return None;
    }
    Some(extension)
}

/// Format inference policy for one resolver instance.
#[derive(Debug, Clone, Default)]
pub struct FormatInference {
    default_format: Option<String>,
    extension_map: HashMap<String, String>,
}

impl FormatInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every resolved image to this format.
    pub fn with_default_format(mut self, format: Option<String>) -> Self {
        self.default_format = format.map(|f| f.to_ascii_lowercase());
        self
    }

    /// Rewrite case-folded extensions through an alias table.
    pub fn with_extension_map(mut self, map: HashMap<String, String>) -> Self {
        self.extension_map = map
            .into_iter()
            .map(|(from, to)| (from.to_ascii_lowercase(), to.to_ascii_lowercase()))
            .collect();
        self
    }

    pub fn default_format(&self) -> Option<&str> {
        self.default_format.as_deref()
    }

    /// Infer the format for `name`, preferring `supplied` over the extension.
    ///
    /// Fails with a not-found error when nothing determines a format, since
    /// an image without one cannot be served.
    pub fn infer(&self, name: &str, supplied: Option<&str>) -> Result<String> {
        if let Some(format) = &self.default_format {
            return Ok(format.clone());
        }
        if let Some(format) = supplied {
            return Ok(format.to_ascii_lowercase());
        }
        match trailing_extension(name) {
            Some(extension) => Ok(self.normalize(extension)),
            None => {
                let message = format!("Format could not be determined for: {name}.");
                warn!(name, "format could not be determined");
                Err(ResolverError::not_found(message))
            }
        }
    }

    /// Infer the format from an HTTP `Content-Type`, falling back to `name`.
    pub fn infer_from_content_type(
        &self,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<String> {
        let supplied = match content_type {
            Some(content_type) => {
                let format = format_for_media_type(content_type);
                if format.is_none() {
                    warn!(
                        content_type,
                        ident = name,
                        "origin may be responding with an incorrect content-type"
                    );
                }
                format
            }
            None => None,
        };
        let format = self.infer(name, supplied)?;
        debug!(ident = name, %format, "inferred source format");
        Ok(format)
    }

    fn normalize(&self, extension: &str) -> String {
        let lower = extension.to_ascii_lowercase();
        match self.extension_map.get(&lower) {
            Some(alias) => alias.clone(),
            None => lower,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_table() {
        assert_eq!(format_for_media_type("image/tiff"), Some("tif"));
        assert_eq!(format_for_media_type("image/jpeg; charset=binary"), Some("jpg"));
        assert_eq!(format_for_media_type("IMAGE/JP2"), Some("jp2"));
        assert_eq!(format_for_media_type("text/html"), None);
    }

    #[test]
    fn extension_length_limit() {
        assert_eq!(trailing_extension("x/y.jpg"), Some("jpg"));
        assert_eq!(trailing_extension("x/y.tiff"), Some("tiff"));
        assert_eq!(trailing_extension("x/y.jpeg2"), None);
        assert_eq!(trailing_extension("x/y."), None);
        assert_eq!(trailing_extension("noextension"), None);
    }

    #[test]
    fn default_format_wins() {
        let inference = FormatInference::new().with_default_format(Some("JP2".into()));
        assert_eq!(inference.infer("a.jpg", Some("tif")).unwrap(), "jp2");
    }

    #[test]
    fn supplied_format_beats_extension() {
        let inference = FormatInference::new();
        assert_eq!(inference.infer("a.jpg", Some("tif")).unwrap(), "tif");
        assert_eq!(inference.infer("a.JPG", None).unwrap(), "jpg");
    }

    #[test]
    fn undetermined_format_is_not_found() {
        let err = FormatInference::new().infer("abc", None).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Format could not be determined"));
    }

    #[test]
    fn extension_map_after_case_folding() {
        let map = HashMap::from([("jpeg".to_string(), "jpg".to_string())]);
        let inference = FormatInference::new().with_extension_map(map);
        assert_eq!(inference.infer("a.jpeg", None).unwrap(), "jpg");
        assert_eq!(inference.infer("a.JPEG", None).unwrap(), "jpg");
        assert_eq!(inference.infer("a.tif", None).unwrap(), "tif");
    }

    #[test]
    fn unknown_content_type_falls_back_to_identifier() {
        let inference = FormatInference::new();
        let format = inference
            .infer_from_content_type("img/a.png", Some("application/octet-stream"))
            .unwrap();
        assert_eq!(format, "png");
    }
}

//! Identifier decoding and path-safety helpers.

use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::{ResolverError, Result};

/// Percent-decode an identifier taken from a request path.
pub fn decode(ident: &str) -> Result<String> {
    percent_decode_str(ident)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ResolverError::not_found(format!("Malformed identifier: {ident}.")))
}

/// Whether the identifier is itself an absolute `http`/`https` URL.
pub fn is_url(ident: &str) -> bool {
    ident.starts_with("http://") || ident.starts_with("https://")
}

/// Interpret a decoded identifier as a path relative to some root.
///
/// Returns `None` for absolute paths and paths with `..` components, which
/// would let a join escape the root.
pub fn relative_path(decoded: &str) -> Option<PathBuf> {
    let path = Path::new(decoded);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(relative)
}

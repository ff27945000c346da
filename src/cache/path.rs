//! Deterministic, sharded cache directory derivation.

use std::path::PathBuf;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::ident::relative_path;

/// Bytes of digest used for the shard path (128 bits).
const DIGEST_BYTES: usize = 16;

/// `quote_plus` encoding: alphanumerics and `_.-` pass through, spaces
/// become `+`, everything else is percent-escaped.
const QUOTE_PLUS: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b' ');

fn quote_plus(ident: &str) -> String {
    utf8_percent_encode(ident, QUOTE_PLUS)
        .to_string()
        .replace(' ', "+")
}

/// Hash-derived directory structure for an identifier.
///
/// The hex digest is split into a 2-character directory followed by
/// 3-character directories, which keeps per-directory fan-out bounded no
/// matter how identifiers are shaped.
pub fn hash_file_structure(ident: &str) -> PathBuf {
    let digest = Sha256::digest(quote_plus(ident).as_bytes());
    let hex = hex::encode(&digest[..DIGEST_BYTES]);

    let mut path = PathBuf::from(&hex[..2]);
    let mut start = 2;
    while start < hex.len() {
        let end = (start + 3).min(hex.len());
        path.push(&hex[start..end]);
        start = end;
    }
    path
}

/// Cache directory for a decoded identifier, relative to the cache root.
///
/// Colon-delimited pid-space prefixes (`fedora:ns:123` → `fedora/ns/`) are
/// kept as readable directories; URL identifiers are grouped under `http/`.
///
/// ```rust
/// # use loris_resolver::cache::cache_subroot;
/// let path = cache_subroot("demo:ns:1234");
/// assert!(path.starts_with("demo/ns"));
/// assert_eq!(path, cache_subroot("demo:ns:1234"));
/// ```
pub fn cache_subroot(ident: &str) -> PathBuf {
    let mut path = PathBuf::new();

    if ident.starts_with("http:/") || ident.starts_with("https:/") {
        path.push("http");
    } else {
        let segments: Vec<&str> = ident.split(':').collect();
        for segment in &segments[..segments.len() - 1] {
            if let Some(segment) = relative_path(segment) {
                path.push(segment);
            }
        }
    }

    path.push(hash_file_structure(ident));
    path
}

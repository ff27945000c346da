//! Local source-image cache.
//!
//! Caching strategies stage remote bytes under a cache root. Each identifier
//! owns one directory whose location is derived purely from the identifier
//! (see [`path::cache_subroot`]), holding a single `loris_cache.<format>`
//! file:
//!
//! ```text
//! <cache_root>/<pid-space dirs>/<2 hex>/<3 hex>/.../loris_cache.jp2
//! ```
//!
//! An entry directory is write-once: it only ever appears through an atomic
//! rename of a fully written staging directory ([`stage::StagedEntry`]), and
//! concurrent first accesses to the same identifier within a process share a
//! single population ([`stage::Inflight`]).

pub mod path;
pub mod stage;

pub use path::{cache_subroot, hash_file_structure};
pub use stage::{Inflight, StagedEntry, ensure_dir};

/// File stem of staged source images inside an entry directory.
pub const CACHE_FILE_STEM: &str = "loris_cache";

/// File name for a staged image of the given format.
pub fn cache_file_name(format: &str) -> String {
    format!("{CACHE_FILE_STEM}.{format}")
}

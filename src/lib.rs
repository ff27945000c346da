//! Loris resolver - map image identifiers to local source files
//!
//! An image server receives opaque, percent-encoded identifiers. This crate
//! turns each one into a [`ResolvedImage`]: a path on local disk and a
//! lowercase format name. Strategies implement the [`Resolver`] trait and
//! differ in where the bytes live:
//!
//! - directly under one or more local directories,
//! - behind an HTTP origin, fetched once into a sharded local cache,
//! - behind one of several templated HTTP origins selected by prefix,
//! - on a mounted network share, copied once into a local mirror,
//! - at a location named by an external search index.
//!
//! # Example
//!
//! ```rust,no_run
//! use loris_resolver::{Resolver, ResolverConfig};
//!
//! #[tokio::main]
//! async fn main() -> loris_resolver::Result<()> {
//!     let config = ResolverConfig::from_toml_str(
//!         r#"
//!         [resolver]
//!         impl = "simple_http"
//!         cache_root = "/var/cache/loris"
//!         source_prefix = "https://images.example.org/"
//!         "#,
//!     )?;
//!     let resolver = config.build()?;
//!
//!     let image = resolver.resolve("collection%2Fpage-001.jp2").await?;
//!     println!("{} ({})", image.path.display(), image.format);
//!     Ok(())
//! }
//! ```
//!
//! Logging goes through `tracing` and metrics through the `metrics` facade;
//! install a subscriber and recorder in the host to collect them.

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod ident;
pub mod resolver;
pub mod telemetry;

pub use config::{Config, ResolverConfig};
pub use error::{ResolverError, Result};
pub use format::FormatInference;
pub use resolver::{
    CachingHttpResolver, FsResolver, MetadataResolver, NetworkFsResolver, ResolvedImage, Resolver,
};

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

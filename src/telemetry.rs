//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus, statsd);
//! without a recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `loris_resolver_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `resolver`: strategy name (e.g. "simple_http", "template_http")
//! - `status`: outcome: "ok" or "error"

/// Total `resolve` calls.
///
/// Labels: `resolver`, `status` ("ok" | "error").
pub const RESOLVE_TOTAL: &str = "loris_resolver_resolve_total";

/// Resolves answered from an existing local cache entry.
///
/// Labels: `resolver`.
pub const CACHE_HITS_TOTAL: &str = "loris_resolver_cache_hits_total";

/// Resolves that had to populate the local cache.
///
/// Labels: `resolver`.
pub const CACHE_MISSES_TOTAL: &str = "loris_resolver_cache_misses_total";

/// Population fetches against a remote origin or mounted source.
///
/// Labels: `resolver`, `status` ("ok" | "error").
pub const FETCHES_TOTAL: &str = "loris_resolver_fetches_total";

/// Population fetch duration in seconds.
///
/// Labels: `resolver`.
pub const FETCH_DURATION_SECONDS: &str = "loris_resolver_fetch_duration_seconds";

pub(crate) fn status_label<T, E>(result: &std::result::Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}

pub(crate) fn record_resolve<T, E>(resolver: &str, result: &std::result::Result<T, E>) {
    metrics::counter!(
        RESOLVE_TOTAL,
        "resolver" => resolver.to_string(),
        "status" => status_label(result)
    )
    .increment(1);
}

pub(crate) fn record_cache_hit(resolver: &str) {
    metrics::counter!(CACHE_HITS_TOTAL, "resolver" => resolver.to_string()).increment(1);
}

pub(crate) fn record_cache_miss(resolver: &str) {
    metrics::counter!(CACHE_MISSES_TOTAL, "resolver" => resolver.to_string()).increment(1);
}

pub(crate) fn record_fetch<T, E>(
    resolver: &str,
    result: &std::result::Result<T, E>,
    elapsed: std::time::Duration,
) {
    metrics::counter!(
        FETCHES_TOTAL,
        "resolver" => resolver.to_string(),
        "status" => status_label(result)
    )
    .increment(1);
    metrics::histogram!(FETCH_DURATION_SECONDS, "resolver" => resolver.to_string())
        .record(elapsed.as_secs_f64());
}

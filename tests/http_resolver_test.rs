//! Integration tests for [`CachingHttpResolver`] with a prefix locator,
//! against a wiremock origin.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use loris_resolver::config::HttpConfig;
use loris_resolver::{CachingHttpResolver, Resolver};

fn config(server: &MockServer, cache_root: &Path) -> HttpConfig {
    HttpConfig {
        cache_root: Some(cache_root.to_path_buf()),
        source_prefix: format!("{}/images/", server.uri()),
        ..Default::default()
    }
}

fn image(content_type: &str, body: &[u8]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_vec(), content_type)
}

// =============================================================================
// Population
// =============================================================================

#[tokio::test]
async fn first_resolve_fetches_then_serves_from_disk() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/page1.jpg"))
        .respond_with(image("image/jpeg", b"jpeg bytes"))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&config(&server, cache.path())).unwrap();
    assert!(!resolver.in_cache("page1.jpg").await);

    let first = resolver.resolve("page1.jpg").await.unwrap();
    assert_eq!(first.format, "jpg");
    assert!(first.path.starts_with(cache.path()));
    assert_eq!(first.path.file_name().unwrap(), "loris_cache.jpg");
    assert_eq!(std::fs::read(&first.path).unwrap(), b"jpeg bytes");

    // answered from disk; the mock would fail on a second GET
    let second = resolver.resolve("page1.jpg").await.unwrap();
    assert_eq!(first, second);
    assert!(resolver.is_resolvable("page1.jpg").await);
}

#[tokio::test]
async fn content_type_beats_identifier_extension() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/scan.jpg"))
        .respond_with(image("image/tiff", b"tiff bytes"))
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&config(&server, cache.path())).unwrap();
    let resolved = resolver.resolve("scan.jpg").await.unwrap();
    assert_eq!(resolved.format, "tif");
    assert_eq!(resolved.path.file_name().unwrap(), "loris_cache.tif");
}

#[tokio::test]
async fn unknown_content_type_falls_back_to_extension() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/scan.JP2"))
        .respond_with(image("application/octet-stream", b"jp2"))
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&config(&server, cache.path())).unwrap();
    assert_eq!(resolver.resolve("scan.JP2").await.unwrap().format, "jp2");
}

#[tokio::test]
async fn default_format_overrides_everything() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/obj:1/datastreams/master/content"))
        .respond_with(image("image/jpeg", b"bytes"))
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&HttpConfig {
        source_suffix: "/datastreams/master/content".into(),
        default_format: Some("JP2".into()),
        ..config(&server, cache.path())
    })
    .unwrap();
    let resolved = resolver.resolve("obj:1").await.unwrap();
    assert_eq!(resolved.format, "jp2");
    assert!(resolved.path.starts_with(cache.path().join("obj")));
}

#[tokio::test]
async fn no_format_anywhere_is_not_found() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/noext"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"?".to_vec(), "text/plain"))
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&config(&server, cache.path())).unwrap();
    let err = resolver.resolve("noext").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.public_message().contains("Format could not be determined"));
    assert!(!resolver.in_cache("noext").await);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn origin_404_is_not_found_and_leaves_no_entry() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&config(&server, cache.path())).unwrap();
    let err = resolver.resolve("missing.jpg").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.status_code(), 404);
    assert!(err.public_message().contains("404"));
    assert!(!err.public_message().contains(&server.uri()));
    assert!(err.detail().contains(&server.uri()));
    assert!(!resolver.cache_dir_path("missing.jpg").exists());

    // failures are not cached
    assert!(resolver.resolve("missing.jpg").await.is_err());
}

#[tokio::test]
async fn unreachable_origin_is_not_found() {
    let cache = tempfile::tempdir().unwrap();
    let resolver = CachingHttpResolver::simple(&HttpConfig {
        cache_root: Some(cache.path().to_path_buf()),
        // reserved port, nothing listens here
        source_prefix: "http://127.0.0.1:9/".into(),
        timeout_secs: Some(5),
        ..Default::default()
    })
    .unwrap();

    assert!(!resolver.is_resolvable("a.jpg").await);
    assert!(resolver.resolve("a.jpg").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn ident_regex_rejects_without_requests() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&HttpConfig {
        ident_regex: Some("allowed/".into()),
        ..config(&server, cache.path())
    })
    .unwrap();

    assert!(!resolver.is_resolvable("other/a.jpg").await);
    assert!(resolver.resolve("other/a.jpg").await.unwrap_err().is_not_found());
    // anchored at the start
    assert!(!resolver.is_resolvable("x/allowed/a.jpg").await);
}

// =============================================================================
// Probing
// =============================================================================

#[tokio::test]
async fn head_resolvable_probes_with_head_only() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("HEAD"))
        .and(path("/images/a.jpg"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&HttpConfig {
        head_resolvable: true,
        ..config(&server, cache.path())
    })
    .unwrap();
    assert!(resolver.is_resolvable("a.jpg").await);
    assert!(!resolver.in_cache("a.jpg").await);
}

#[tokio::test]
async fn get_probe_reports_origin_status() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/gone.jpg"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&config(&server, cache.path())).unwrap();
    assert!(!resolver.is_resolvable("gone.jpg").await);
}

// =============================================================================
// Locator options
// =============================================================================

#[tokio::test]
async fn uri_identifiers_are_fetched_directly() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/direct/img.png"))
        .respond_with(image("image/png", b"png"))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&HttpConfig {
        cache_root: Some(cache.path().to_path_buf()),
        uri_resolvable: true,
        ..Default::default()
    })
    .unwrap();

    let ident = format!("{}/direct/img.png", server.uri());
    let resolved = resolver.resolve(&ident).await.unwrap();
    assert_eq!(resolved.format, "png");
    assert!(resolved.path.starts_with(cache.path().join("http")));
}

#[tokio::test]
async fn percent_encoded_identifiers_are_decoded_before_fetch() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/books/vol1.jpg"))
        .respond_with(image("image/jpeg", b"jpeg"))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&config(&server, cache.path())).unwrap();
    let encoded = resolver.resolve("books%2Fvol1.jpg").await.unwrap();
    let plain = resolver.resolve("books/vol1.jpg").await.unwrap();
    assert_eq!(encoded, plain);
}

#[tokio::test]
async fn basic_auth_is_sent() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    // base64("u:p")
    Mock::given(method("GET"))
        .and(path("/images/private.jpg"))
        .and(header("authorization", "Basic dTpw"))
        .respond_with(image("image/jpeg", b"secret"))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = CachingHttpResolver::simple(&HttpConfig {
        user: Some("u".into()),
        pw: Some("p".into()),
        ..config(&server, cache.path())
    })
    .unwrap();
    assert!(resolver.resolve("private.jpg").await.is_ok());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_fetches_once() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/busy.jpg"))
        .respond_with(image("image/jpeg", b"busy").set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = Arc::new(CachingHttpResolver::simple(&config(&server, cache.path())).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve("busy.jpg").await })
        })
        .collect();

    let mut paths = Vec::new();
    for handle in handles {
        paths.push(handle.await.unwrap().unwrap().path);
    }
    assert!(paths.windows(2).all(|w| w[0] == w[1]));

    // only the committed entry remains next to the shard
    let entry = paths[0].parent().unwrap();
    let siblings = std::fs::read_dir(entry.parent().unwrap()).unwrap().count();
    assert_eq!(siblings, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn staggered_callers_fetch_once() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/images/late.jpg"))
        .respond_with(image("image/jpeg", b"late").set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let resolver = Arc::new(CachingHttpResolver::simple(&config(&server, cache.path())).unwrap());

    // callers keep arriving before, during and after the first population
    let mut handles = Vec::new();
    for _ in 0..400 {
        let resolver = Arc::clone(&resolver);
        handles.push(tokio::spawn(async move { resolver.resolve("late.jpg").await }));
        tokio::time::sleep(Duration::from_micros(250)).await;
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let fetches = server.received_requests().await.unwrap().len();
    assert_eq!(fetches, 1);
}

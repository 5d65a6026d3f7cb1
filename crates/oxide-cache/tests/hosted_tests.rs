//! Hosted cache client against a mock cache service.

use oxide_cache::archiver::{Archiver, TarArchiver};
use oxide_cache::fallback::SecondaryCache;
use oxide_cache::hosted::{HostedCache, HostedCacheEndpoint, cache_version};
use oxide_core::CompressionMethod;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "runtime-token";

fn client(server: &MockServer, workspace: &Path, temp_dir: &Path) -> HostedCache {
    HostedCache::new(
        Some(HostedCacheEndpoint {
            base_url: format!("{}/", server.uri()),
            token: TOKEN.to_string(),
        }),
        Arc::new(TarArchiver::new(workspace)),
        CompressionMethod::Zstd,
        temp_dir,
    )
}

fn paths() -> Vec<String> {
    vec!["target".to_string()]
}

fn packed_archive(contents: &[u8]) -> Vec<u8> {
    let source = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(source.path().join("target")).unwrap();
    std::fs::write(source.path().join("target/out.txt"), contents).unwrap();
    let archive = TarArchiver::new(source.path())
        .pack(
            source.path(),
            &[PathBuf::from("target")],
            CompressionMethod::Zstd,
        )
        .unwrap();
    std::fs::read(archive).unwrap()
}

#[tokio::test]
async fn test_restore_downloads_and_extracts_entry() {
    let server = MockServer::start().await;
    let version = cache_version(&paths(), CompressionMethod::Zstd);

    Mock::given(method("GET"))
        .and(path("/_apis/artifactcache/cache"))
        .and(query_param("keys", "linux-x64-abc,linux-"))
        .and(query_param("version", version.as_str()))
        .and(header("authorization", "Bearer runtime-token"))
        .and(header("accept", "application/json;api-version=6.0-preview.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "scope": "refs/heads/main",
            "cacheKey": "linux-",
            "cacheVersion": version,
            "archiveLocation": format!("{}/blobs/cache.tzst", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blobs/cache.tzst"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(packed_archive(b"from hosted")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    let cache = client(&server, &workspace, &dir.path().join("tmp"));

    let matched = cache
        .restore(&paths(), "linux-x64-abc", &["linux-".to_string()])
        .await
        .unwrap();

    assert_eq!(matched.as_deref(), Some("linux-"));
    assert_eq!(
        std::fs::read(workspace.join("target/out.txt")).unwrap(),
        b"from hosted"
    );
}

#[tokio::test]
async fn test_restore_miss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_apis/artifactcache/cache"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache = client(&server, dir.path(), dir.path());

    let matched = cache.restore(&paths(), "linux-x64-abc", &[]).await.unwrap();
    assert_eq!(matched, None);
}

#[tokio::test]
async fn test_restore_server_error_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_apis/artifactcache/cache"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache = client(&server, dir.path(), dir.path());

    let err = cache
        .restore(&paths(), "linux-x64-abc", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, oxide_core::Error::FallbackFailed(_)));
}

#[tokio::test]
async fn test_save_reserves_uploads_and_commits() {
    let server = MockServer::start().await;
    let version = cache_version(&paths(), CompressionMethod::Zstd);

    Mock::given(method("POST"))
        .and(path("/_apis/artifactcache/caches"))
        .and(header("authorization", "Bearer runtime-token"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "cacheId": 42 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/_apis/artifactcache/caches/42"))
        .and(header("content-type", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_apis/artifactcache/caches/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(workspace.join("target")).unwrap();
    std::fs::write(workspace.join("target/out.txt"), b"build output").unwrap();
    let cache = client(&server, &workspace, &dir.path().join("tmp"));

    cache.save(&paths(), "linux-x64-abc").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let reserve: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(reserve["key"], "linux-x64-abc");
    assert_eq!(reserve["version"], version.as_str());
    let size = reserve["cacheSize"].as_u64().unwrap();
    assert!(size > 0);

    let patch = &requests[1];
    assert_eq!(patch.body.len() as u64, size);
    assert_eq!(
        patch
            .headers
            .get("content-range")
            .and_then(|v| v.to_str().ok()),
        Some(format!("bytes 0-{}/*", size - 1).as_str())
    );

    let commit: serde_json::Value = serde_json::from_slice(&requests[2].body).unwrap();
    assert_eq!(commit, json!({ "size": size }));
}

#[tokio::test]
async fn test_save_reservation_conflict_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_apis/artifactcache/caches"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("target")).unwrap();
    let cache = client(&server, dir.path(), &dir.path().join("tmp"));

    let err = cache.save(&paths(), "linux-x64-abc").await.unwrap_err();
    assert!(err.to_string().contains("unable to reserve cache"));
}

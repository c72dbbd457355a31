//! Package cache tests exercising the public cache API

use crate::common::fixtures::SCORM_12_MANIFEST;
use crate::common::{create_test_config, setup_test_env};
use chrono::Utc;
use scorm_engine::cache::PackageCache;
use scorm_engine::manifest::parse_manifest;
use scorm_engine::package::{ExtractedPackage, FileBlob, PackageKey};
use std::collections::HashMap;

fn fixture_package(key: &str) -> ExtractedPackage {
    let manifest = parse_manifest(SCORM_12_MANIFEST).unwrap();
    let mut files = HashMap::new();
    for (path, body) in [
        ("lesson1.html", "<html>Lesson</html>"),
        ("reference.html", "<html>Reference</html>"),
        ("shared/player.js", "window.player = {};"),
    ] {
        files.insert(
            path.to_string(),
            FileBlob::new(path, body.as_bytes().to_vec()),
        );
    }
    let mut file_list: Vec<String> = files.keys().cloned().collect();
    file_list.sort();
    ExtractedPackage {
        key: PackageKey::new(key),
        version: manifest.version,
        manifest,
        files,
        file_list,
        original_url: format!("https://example.com/{key}.zip"),
        extracted_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_entries_survive_cache_reopen() {
    let temp = setup_test_env();
    let config = create_test_config(temp.path());
    let key = PackageKey::new("persist");

    {
        let cache = PackageCache::new(config.cache.clone()).await.unwrap();
        cache.store(&fixture_package("persist"), None).await.unwrap();
    }

    // A fresh cache over the same database, with the fast backend disabled,
    // must reconstruct the package from durable storage alone.
    let mut durable_only = config.cache.clone();
    durable_only.memory_enabled = false;
    let cache = PackageCache::new(durable_only).await.unwrap();

    let package = cache.get(&key).await.unwrap().unwrap();
    assert_eq!(package.file_list.len(), 3);
    assert_eq!(package.manifest.entry_point.as_deref(), Some("lesson1.html"));

    let blob = cache.get_file(&key, "shared/player.js").await.unwrap();
    assert_eq!(blob.mime, "text/javascript");
}

#[tokio::test]
async fn test_file_list_json_round_trips() {
    let temp = setup_test_env();
    let config = create_test_config(temp.path());
    let cache = PackageCache::new(config.cache).await.unwrap();

    let package = fixture_package("json");
    cache.store(&package, None).await.unwrap();

    let json = cache.file_list_json(&package.key).await.unwrap();
    let listed: Vec<String> = serde_json::from_slice(&json).unwrap();
    assert_eq!(listed, package.file_list);
}

#[tokio::test]
async fn test_resource_urls_are_namespaced_per_package() {
    let temp = setup_test_env();
    let config = create_test_config(temp.path());
    let namespace = config.cache.namespace.clone();
    let cache = PackageCache::new(config.cache).await.unwrap();

    let a = cache.resource_url(&PackageKey::new("aaa"), "lesson1.html");
    let b = cache.resource_url(&PackageKey::new("bbb"), "lesson1.html");
    assert_ne!(a, b);
    assert!(a.starts_with(&format!("/{namespace}/aaa/{namespace}/")));
    assert!(a.ends_with("lesson1.html"));
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let temp = setup_test_env();
    let config = create_test_config(temp.path());
    let cache = PackageCache::new(config.cache).await.unwrap();

    for key in ["one", "two", "three"] {
        cache.store(&fixture_package(key), None).await.unwrap();
    }
    assert_eq!(cache.entry_count().await.unwrap(), 3);
    assert!(cache.total_size().await.unwrap() > 0);

    cache.clear().await.unwrap();
    assert_eq!(cache.entry_count().await.unwrap(), 0);
    assert!(cache.get(&PackageKey::new("one")).await.unwrap().is_none());
}

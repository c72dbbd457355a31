//! End-to-end extraction flow tests against a mock content server

use crate::common::fixtures::{
    manifestless_package, scorm_12_package, scorm_12_package_nested, unversioned_package,
};
use crate::common::{MockContentServer, create_test_config, setup_test_env};
use scorm_engine::coordinator::Coordinator;
use scorm_engine::error::{ExtractionError, ScormError};
use scorm_engine::manifest::ScormVersion;
use scorm_engine::package::PackageKey;
use scorm_engine::progress::{CollectingCallback, ExtractionEvent, SharedCallback};
use std::sync::Arc;
use std::time::Duration;

async fn coordinator_with(
    temp: &tempfile::TempDir,
    callback: Option<SharedCallback>,
) -> Coordinator {
    Coordinator::new(create_test_config(temp.path()), callback)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_extract_then_serve_from_cache() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server.serve_package("/pkg.zip", scorm_12_package(), 1).await;

    let coordinator = coordinator_with(&temp, None).await;
    let url = format!("{}/pkg.zip", server.uri());
    let key = PackageKey::derive("course-12", &url);

    let package = coordinator.extract(&url, &key).await.unwrap();
    assert_eq!(package.version, ScormVersion::V1_2);
    assert!(package.file_list.contains(&"lesson1.html".to_string()));
    assert!(package.file_list.contains(&"shared/player.js".to_string()));

    let blob = coordinator.cache().get_file(&key, "lesson1.html").await.unwrap();
    assert!(String::from_utf8_lossy(&blob.data).contains("Lesson One"));

    // Second request is a cache hit; the mock's expectation of at most one
    // download verifies no second fetch happened.
    let again = coordinator.extract(&url, &key).await.unwrap();
    assert_eq!(again.file_list, package.file_list);
}

#[tokio::test]
async fn test_wrapper_directory_is_stripped() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server
        .serve_package("/nested.zip", scorm_12_package_nested(), 1)
        .await;

    let coordinator = coordinator_with(&temp, None).await;
    let url = format!("{}/nested.zip", server.uri());
    let key = PackageKey::derive("course-12", &url);

    let package = coordinator.extract(&url, &key).await.unwrap();
    // Paths are rooted at the manifest directory, not the zip's wrapper.
    assert!(package.file_list.contains(&"lesson1.html".to_string()));
    assert!(!package.file_list.iter().any(|f| f.starts_with("course/")));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_download() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server.serve_package("/pkg.zip", scorm_12_package(), 1).await;

    let coordinator = Arc::new(coordinator_with(&temp, None).await);
    let url = format!("{}/pkg.zip", server.uri());
    let key = PackageKey::derive("course-12", &url);

    let a = {
        let coordinator = coordinator.clone();
        let url = url.clone();
        let key = key.clone();
        tokio::spawn(async move { coordinator.extract(&url, &key).await })
    };
    let b = {
        let coordinator = coordinator.clone();
        let key = key.clone();
        tokio::spawn(async move { coordinator.extract(&url, &key).await })
    };

    let (a, b) = tokio::join!(a, b);
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();
    assert_eq!(a.file_list, b.file_list);
}

#[tokio::test]
async fn test_unknown_version_fails_closed() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server
        .serve_package("/mystery.zip", unversioned_package(), 1)
        .await;

    let coordinator = coordinator_with(&temp, None).await;
    let url = format!("{}/mystery.zip", server.uri());
    let key = PackageKey::derive("mystery", &url);

    let err = coordinator.extract(&url, &key).await.unwrap_err();
    assert!(err.to_string().contains("Unsupported SCORM version"));
    // Nothing half-written is left behind.
    assert!(!coordinator.cache().contains(&key).await.unwrap());
}

#[tokio::test]
async fn test_missing_manifest_fails() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server
        .serve_package("/bare.zip", manifestless_package(), 1)
        .await;

    let coordinator = coordinator_with(&temp, None).await;
    let url = format!("{}/bare.zip", server.uri());
    let key = PackageKey::derive("bare", &url);

    let err = coordinator.extract(&url, &key).await.unwrap_err();
    assert!(err.to_string().contains("imsmanifest"));
}

#[tokio::test]
async fn test_download_retries_transient_failures() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server
        .serve_package_flaky("/pkg.zip", scorm_12_package(), 2)
        .await;

    let coordinator = coordinator_with(&temp, None).await;
    let url = format!("{}/pkg.zip", server.uri());
    let key = PackageKey::derive("course-12", &url);

    // retry_attempts = 3, so two 500s then a 200 still succeeds.
    let package = coordinator.extract(&url, &key).await.unwrap();
    assert_eq!(package.version, ScormVersion::V1_2);
}

#[tokio::test]
async fn test_progress_events_are_monotonic_and_terminal() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server.serve_package("/pkg.zip", scorm_12_package(), 1).await;

    let callback = Arc::new(CollectingCallback::new());
    let coordinator = coordinator_with(&temp, Some(callback.clone() as SharedCallback)).await;
    let url = format!("{}/pkg.zip", server.uri());
    let key = PackageKey::derive("course-12", &url);

    coordinator.extract(&url, &key).await.unwrap();
    // Allow the router to drain the terminal event.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = callback.events();
    assert!(!events.is_empty());

    let mut last_progress = 0.0f64;
    let mut completed = false;
    for event in &events {
        match event {
            ExtractionEvent::Progress { record, .. } => {
                assert!(record.progress >= last_progress, "progress regressed");
                last_progress = record.progress;
            }
            ExtractionEvent::Completed { file_count, .. } => {
                assert_eq!(*file_count, 4);
                completed = true;
            }
            ExtractionEvent::Failed { message, .. } => panic!("unexpected failure: {message}"),
            _ => {}
        }
    }
    assert!(completed, "no completion event observed");
}

#[tokio::test]
async fn test_abort_cancels_inflight_extraction() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server
        .serve_package_slow("/slow.zip", scorm_12_package(), 500)
        .await;

    let coordinator = Arc::new(coordinator_with(&temp, None).await);
    let url = format!("{}/slow.zip", server.uri());
    let key = PackageKey::derive("course-12", &url);

    let handle = {
        let coordinator = coordinator.clone();
        let url = url.clone();
        let key = key.clone();
        tokio::spawn(async move { coordinator.extract(&url, &key).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator.abort(&key).unwrap();

    let result = handle.await.unwrap();
    assert!(matches!(
        result.unwrap_err(),
        ScormError::Extraction(ExtractionError::Canceled)
    ));
    // Canceled extractions leave no cache entry behind.
    assert!(!coordinator.cache().contains(&key).await.unwrap());
}

#[tokio::test]
async fn test_invalidate_then_reextract_downloads_again() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    server.serve_package("/pkg.zip", scorm_12_package(), 2).await;

    let coordinator = coordinator_with(&temp, None).await;
    let url = format!("{}/pkg.zip", server.uri());
    let key = PackageKey::derive("course-12", &url);

    coordinator.extract(&url, &key).await.unwrap();
    assert!(coordinator.invalidate(&key).await.unwrap());
    assert!(!coordinator.invalidate(&key).await.unwrap());

    let package = coordinator.extract(&url, &key).await.unwrap();
    assert_eq!(package.version, ScormVersion::V1_2);
}

#[tokio::test]
async fn test_extract_course_applies_entry_point_override() {
    let temp = setup_test_env();
    let server = MockContentServer::new().await;
    let package_url = format!("{}/pkg.zip", server.uri());
    server.serve_package("/pkg.zip", scorm_12_package(), 1).await;
    server
        .serve_course_meta("course-12", &package_url, Some("reference.html"))
        .await;

    let coordinator = coordinator_with(&temp, None).await;
    let source = scorm_engine::remote::HttpPackageSource::new(server.uri());

    let (package, entry_point) = coordinator
        .extract_course(&source, "course-12")
        .await
        .unwrap();
    assert_eq!(entry_point, "reference.html");
    // Without the override the manifest's first item href would win.
    assert_eq!(package.manifest.entry_point.as_deref(), Some("lesson1.html"));
}

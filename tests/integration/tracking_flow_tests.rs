//! Tracking session flow tests against a mock tracking backend

use crate::common::MockContentServer;
use scorm_engine::config::TrackingConfig;
use scorm_engine::manifest::ScormVersion;
use scorm_engine::remote::{HttpTrackingBackend, InMemoryTrackingBackend};
use scorm_engine::tracking::TrackingSession;
use std::sync::Arc;

fn fast_tracking_config() -> TrackingConfig {
    TrackingConfig {
        bind_delay_ms: 1,
        persist_backoff_ms: 1,
        ..TrackingConfig::default()
    }
}

#[tokio::test]
async fn test_commit_posts_to_http_backend() {
    let server = MockContentServer::new().await;
    server.serve_tracking_endpoint("/tracking/commits", 0).await;

    let backend = Arc::new(HttpTrackingBackend::new(format!(
        "{}/tracking/commits",
        server.uri()
    )));
    let session = TrackingSession::new(
        "session-http",
        "course-12",
        ScormVersion::V1_2,
        fast_tracking_config(),
        backend,
    );

    session.initialize().unwrap();
    session
        .set_value("cmi.core.lesson_status", "completed")
        .unwrap();
    session.commit().await.unwrap();

    assert_eq!(server.request_count().await, 1);
}

#[tokio::test]
async fn test_persist_retries_transient_backend_failures() {
    let server = MockContentServer::new().await;
    server.serve_tracking_endpoint("/tracking/commits", 2).await;

    let backend = Arc::new(HttpTrackingBackend::new(format!(
        "{}/tracking/commits",
        server.uri()
    )));
    let session = TrackingSession::new(
        "session-retry",
        "course-12",
        ScormVersion::V2004,
        fast_tracking_config(),
        backend,
    );

    session.initialize().unwrap();
    session
        .set_value("cmi.completion_status", "incomplete")
        .unwrap();
    session.commit().await.unwrap();

    // Two 500s plus the final success.
    assert_eq!(server.request_count().await, 3);
}

#[tokio::test]
async fn test_persist_exhaustion_does_not_fail_the_session() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tracking/commits"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = Arc::new(HttpTrackingBackend::new(format!(
        "{}/tracking/commits",
        server.uri()
    )));
    let session = TrackingSession::new(
        "session-down",
        "course-12",
        ScormVersion::V1_2,
        fast_tracking_config(),
        backend,
    );

    session.initialize().unwrap();
    session.set_value("cmi.core.score.raw", "42").unwrap();
    // Backend is down for good; the commit is dropped with a warning but the
    // runtime call still succeeds.
    session.commit().await.unwrap();
    session.terminate().await.unwrap();
}

#[tokio::test]
async fn test_http_backend_loads_stored_record() {
    use scorm_engine::remote::{TrackingBackend, TrackingRecord};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    let stored = TrackingRecord {
        user_id: "learner-1".to_string(),
        package_id: "course-12".to_string(),
        data_blob: std::collections::HashMap::from([(
            "cmi.suspend_data".to_string(),
            "slide=3".to_string(),
        )]),
        completion_status: "incomplete".to_string(),
        location: Some("lesson1.html".to_string()),
        score: None,
    };
    Mock::given(method("GET"))
        .and(path("/tracking/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&stored))
        .mount(&server)
        .await;

    let backend = HttpTrackingBackend::new(format!("{}/tracking/records", server.uri()));
    let record = backend
        .load("learner-1", "course-12")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record, stored);

    // An endpoint with nothing stored answers 404, which reads as None.
    let empty = HttpTrackingBackend::new(format!("{}/tracking/nothing", server.uri()));
    assert!(empty.load("learner-1", "course-12").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_auto_commit_pushes_dirty_data() {
    let backend = Arc::new(InMemoryTrackingBackend::new());
    let session = Arc::new(TrackingSession::new(
        "session-auto",
        "course-12",
        ScormVersion::V2004,
        TrackingConfig {
            auto_commit_secs: 1,
            ..fast_tracking_config()
        },
        backend.clone(),
    ));

    session.initialize().unwrap();
    let task = session.start_auto_commit().unwrap();

    session.set_value("cmi.location", "page-1").unwrap();
    // Paused time auto-advances past the commit interval.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    tokio::task::yield_now().await;

    let commits = backend.commits();
    assert!(!commits.is_empty(), "auto-commit never fired");
    assert_eq!(commits[0].data["cmi.location"], "page-1");

    session.terminate().await.unwrap();
    task.abort();
}

//! Mock content server for extraction tests

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Wraps a wiremock server serving course packages and metadata.
pub struct MockContentServer {
    server: MockServer,
}

impl MockContentServer {
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Serves `archive` at `route`, expecting at most `expected_hits`
    /// requests.
    pub async fn serve_package(&self, route: &str, archive: Vec<u8>, expected_hits: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(archive)
                    .insert_header("content-type", "application/zip"),
            )
            .expect(0..=expected_hits)
            .mount(&self.server)
            .await;
    }

    /// Serves `archive` at `route` after failing the first `failures`
    /// requests with a 500.
    pub async fn serve_package_flaky(&self, route: &str, archive: Vec<u8>, failures: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(failures)
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(archive)
                    .insert_header("content-type", "application/zip"),
            )
            .mount(&self.server)
            .await;
    }

    /// Serves `archive` at `route` with a fixed response delay.
    pub async fn serve_package_slow(&self, route: &str, archive: Vec<u8>, delay_ms: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(archive)
                    .set_delay(std::time::Duration::from_millis(delay_ms)),
            )
            .mount(&self.server)
            .await;
    }

    /// Serves course package metadata at the resolution endpoint.
    pub async fn serve_course_meta(
        &self,
        course_id: &str,
        package_url: &str,
        entry_point: Option<&str>,
    ) {
        let body = serde_json::json!({
            "url": package_url,
            "entry_point": entry_point,
        });
        Mock::given(method("GET"))
            .and(path(format!("/courses/{course_id}/package")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Mounts a tracking commit endpoint that fails the first `failures`
    /// POSTs with a 500 and accepts the rest.
    pub async fn serve_tracking_endpoint(&self, route: &str, failures: u64) {
        if failures > 0 {
            Mock::given(method("POST"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(500))
                .up_to_n_times(failures)
                .mount(&self.server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    /// Number of requests received so far, across all mounts.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}

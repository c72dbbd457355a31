//! Extraction coordinator
//!
//! The caller-facing front of the engine. Serves packages from the cache
//! when possible, deduplicates concurrent extraction requests for the same
//! key by attaching late callers to the in-flight attempt, enforces the
//! overall extraction timeout, and fans progress out to display and logging
//! layers with their own throttling.

use crate::cache::PackageCache;
use crate::config::EngineConfig;
use crate::error::{ExtractionError, Result};
use crate::extractor::ExtractionWorker;
use crate::package::{ExtractedPackage, PackageKey};
use crate::progress::{
    ExtractionEvent, ExtractionStage, ProgressRecord, ProgressThrottle, SharedCallback,
};
use crate::protocol::{WorkerRequest, WorkerResponse};
use crate::remote::PackageSource;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Capacity of the per-key fan-out channel. Progress is throttled upstream,
/// so this only needs to absorb short bursts.
const FANOUT_CAPACITY: usize = 64;

pub struct Coordinator {
    cache: Arc<PackageCache>,
    config: EngineConfig,
    requests: mpsc::UnboundedSender<WorkerRequest>,
    inflight: Arc<DashMap<PackageKey, broadcast::Sender<WorkerResponse>>>,
    records: Arc<DashMap<PackageKey, ProgressRecord>>,
    router: tokio::task::JoinHandle<()>,
}

impl Coordinator {
    /// Builds the cache, spawns the extraction worker, and starts the
    /// response router.
    pub async fn new(config: EngineConfig, callback: Option<SharedCallback>) -> Result<Self> {
        let cache = Arc::new(PackageCache::new(config.cache.clone()).await?);
        let handle = ExtractionWorker::spawn(
            cache.clone(),
            config.download.clone(),
            config.extraction.clone(),
        );

        let inflight: Arc<DashMap<PackageKey, broadcast::Sender<WorkerResponse>>> =
            Arc::new(DashMap::new());
        let records: Arc<DashMap<PackageKey, ProgressRecord>> = Arc::new(DashMap::new());

        let router = tokio::spawn(route_responses(
            handle.responses,
            inflight.clone(),
            records.clone(),
            callback,
            config.extraction.clone(),
        ));

        Ok(Self {
            cache,
            config,
            requests: handle.requests,
            inflight,
            records,
            router,
        })
    }

    pub fn cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }

    /// Returns the package for `key`, extracting it from `url` on a miss.
    ///
    /// Concurrent calls for the same key share one extraction: the first
    /// caller starts it and later callers attach to its progress stream.
    /// Fails with `Timeout` (carrying the last observed stage) when the
    /// attempt outlives the configured extraction timeout.
    #[tracing::instrument(skip(self, url), fields(key = %key))]
    pub async fn extract(&self, url: &str, key: &PackageKey) -> Result<ExtractedPackage> {
        if let Some(package) = self.cache.get(key).await? {
            debug!("Cache hit");
            return Ok(package);
        }

        let mut receiver = self.attach_or_start(url, key)?;

        let deadline = self.config.extraction.timeout();
        let result = tokio::time::timeout(deadline, async {
            loop {
                match receiver.recv().await {
                    Ok(response) if response.is_terminal() => return Ok(response),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Progress fan-out lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ExtractionError::WorkerGone);
                    }
                }
            }
        })
        .await;

        match result {
            Ok(Ok(WorkerResponse::ExtractionComplete { key, .. })) => self
                .cache
                .get(&key)
                .await?
                .ok_or_else(|| ExtractionError::Failed {
                    message: "extracted package missing from cache".to_string(),
                }
                .into()),
            Ok(Ok(WorkerResponse::ExtractionError { error, .. })) => {
                Err(ExtractionError::Failed { message: error }.into())
            }
            Ok(Ok(_)) => Err(ExtractionError::Canceled.into()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                let stage = self
                    .records
                    .get(key)
                    .map(|record| record.stage.to_string())
                    .unwrap_or_else(|| ExtractionStage::Idle.to_string());
                warn!(stage = %stage, "Extraction timed out, aborting");
                let _ = self.requests.send(WorkerRequest::AbortExtraction {
                    key: key.clone(),
                });
                Err(ExtractionError::Timeout { stage }.into())
            }
        }
    }

    /// Resolves a course id through the metadata service and extracts its
    /// package, applying the service's entry point override when present.
    pub async fn extract_course(
        &self,
        source: &dyn PackageSource,
        course_id: &str,
    ) -> Result<(ExtractedPackage, String)> {
        let meta = source.resolve(course_id).await?;
        let key = PackageKey::derive(course_id, &meta.url);
        let package = self.extract(&meta.url, &key).await?;
        let entry_point = package
            .manifest
            .resolve_entry_point(meta.entry_point.as_deref(), &package.file_list)?;
        Ok((package, entry_point))
    }

    /// Subscribes to the in-flight attempt for `key`, starting one when
    /// none exists.
    fn attach_or_start(
        &self,
        url: &str,
        key: &PackageKey,
    ) -> Result<broadcast::Receiver<WorkerResponse>> {
        use dashmap::mapref::entry::Entry;

        match self.inflight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!("Attaching to in-flight extraction");
                Ok(existing.get().subscribe())
            }
            Entry::Vacant(vacant) => {
                let (sender, receiver) = broadcast::channel(FANOUT_CAPACITY);
                vacant.insert(sender);
                self.records.insert(key.clone(), ProgressRecord::new());
                self.requests
                    .send(WorkerRequest::Extract {
                        url: url.to_string(),
                        key: key.clone(),
                    })
                    .map_err(|_| ExtractionError::WorkerGone)?;
                Ok(receiver)
            }
        }
    }

    /// Requests cancellation of the in-flight extraction for `key`, if any.
    pub fn abort(&self, key: &PackageKey) -> Result<()> {
        self.requests
            .send(WorkerRequest::AbortExtraction { key: key.clone() })
            .map_err(|_| ExtractionError::WorkerGone)?;
        Ok(())
    }

    /// Removes the cache entry for `key`. Idempotent.
    ///
    /// When an extraction for the key is in flight it is aborted first and
    /// the purge queued behind it on the worker, so the abort's own cleanup
    /// and this invalidation cannot interleave.
    pub async fn invalidate(&self, key: &PackageKey) -> Result<bool> {
        if self.inflight.contains_key(key) {
            self.requests
                .send(WorkerRequest::AbortExtraction { key: key.clone() })
                .map_err(|_| ExtractionError::WorkerGone)?;
            self.requests
                .send(WorkerRequest::Invalidate { key: key.clone() })
                .map_err(|_| ExtractionError::WorkerGone)?;
            return Ok(true);
        }
        self.cache.invalidate(key).await
    }

    /// Latest progress snapshot for `key`, if an attempt has been seen.
    pub fn progress(&self, key: &PackageKey) -> Option<ProgressRecord> {
        self.records.get(key).map(|record| record.clone())
    }

    /// Stops the router; the worker exits once the request sender drops.
    pub fn shutdown(self) {
        drop(self.requests);
        self.router.abort();
        info!("Coordinator shut down");
    }
}

/// Routes worker responses to per-key subscribers, keeps progress records
/// current, and fans throttled events out to the display callback and the
/// log.
async fn route_responses(
    mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
    inflight: Arc<DashMap<PackageKey, broadcast::Sender<WorkerResponse>>>,
    records: Arc<DashMap<PackageKey, ProgressRecord>>,
    callback: Option<SharedCallback>,
    config: crate::config::ExtractionConfig,
) {
    let mut display_throttles: HashMap<PackageKey, ProgressThrottle> = HashMap::new();
    let mut log_throttles: HashMap<PackageKey, ProgressThrottle> = HashMap::new();

    while let Some(response) = responses.recv().await {
        let key = response.key().clone();

        if let WorkerResponse::ExtractionProgress {
            stage,
            progress,
            total_size,
            processed_files,
            file_count,
            elapsed_ms,
            ..
        } = &response
        {
            let mut record = records.entry(key.clone()).or_default();
            record.update(*stage, *progress, *elapsed_ms);
            record.total_size = *total_size;
            record.processed_files = *processed_files;
            record.file_count = *file_count;
            let snapshot = record.clone();
            drop(record);

            if let Some(callback) = &callback {
                let throttle = display_throttles.entry(key.clone()).or_insert_with(|| {
                    ProgressThrottle::new(
                        config.display_min_delta,
                        Duration::from_millis(config.progress_min_interval_ms),
                    )
                });
                if throttle.should_emit(snapshot.progress, stage.is_terminal()) {
                    callback.on_event(ExtractionEvent::Progress {
                        key: key.as_str().to_string(),
                        record: snapshot.clone(),
                    });
                }
            }

            let throttle = log_throttles.entry(key.clone()).or_insert_with(|| {
                ProgressThrottle::new(
                    config.log_min_delta,
                    Duration::from_millis(config.log_min_interval_ms),
                )
            });
            if throttle.should_emit(snapshot.progress, stage.is_terminal()) {
                debug!(
                    key = %key,
                    stage = %snapshot.stage,
                    progress = snapshot.progress,
                    "Extraction progress"
                );
            }
        }

        if response.is_terminal() {
            if let Some(callback) = &callback {
                match &response {
                    WorkerResponse::ExtractionComplete {
                        file_list, timings, ..
                    } => callback.on_event(ExtractionEvent::Completed {
                        key: key.as_str().to_string(),
                        file_count: file_list.len(),
                        duration_ms: timings.total_ms,
                    }),
                    WorkerResponse::ExtractionError { error, .. } => {
                        callback.on_event(ExtractionEvent::Failed {
                            key: key.as_str().to_string(),
                            message: error.clone(),
                        })
                    }
                    WorkerResponse::ExtractionCanceled { .. } => {
                        callback.on_event(ExtractionEvent::Canceled {
                            key: key.as_str().to_string(),
                        })
                    }
                    _ => {}
                }
            }

            let terminal_stage = match &response {
                WorkerResponse::ExtractionComplete { .. } => ExtractionStage::Complete,
                WorkerResponse::ExtractionCanceled { .. } => ExtractionStage::Canceled,
                _ => ExtractionStage::Error,
            };
            if let Some(mut record) = records.get_mut(&key) {
                let elapsed = record.elapsed_ms;
                let final_progress = if terminal_stage == ExtractionStage::Complete {
                    1.0
                } else {
                    record.progress
                };
                record.update(terminal_stage, final_progress, elapsed);
            }

            display_throttles.remove(&key);
            log_throttles.remove(&key);
            if let Some((_, sender)) = inflight.remove(&key) {
                let _ = sender.send(response);
            }
            continue;
        }

        if let Some(sender) = inflight.get(&key) {
            let _ = sender.send(response);
        }
    }
}

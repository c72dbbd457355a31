//! Archive extraction worker
//!
//! Runs extraction off the caller's task behind a typed message channel.
//! Each `Extract` request downloads the archive, decodes it, and writes the
//! files into the package cache in batches, reporting throttled progress
//! along the way. Abort requests flip a per-key flag that the pipeline
//! checks at chunk and batch boundaries; a canceled extraction purges any
//! partially written cache entry.

use crate::cache::PackageCache;
use crate::config::{DownloadConfig, ExtractionConfig};
use crate::error::{ExtractionError, ManifestError, Result, ScormError};
use crate::manifest::{Manifest, ScormVersion, parse_manifest};
use crate::package::{ExtractedPackage, FileBlob, PackageKey};
use crate::progress::{ExtractionStage, ProgressThrottle};
use crate::protocol::{ExtractionTimings, WorkerRequest, WorkerResponse};
use crate::retry::RetryPolicy;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Fraction of overall progress assigned to the download stage; decoding
/// runs to 0.9 and cache writes fill the remainder.
const DOWNLOAD_BAND: f64 = 0.8;
const DECODE_BAND_END: f64 = 0.9;

/// Channel ends connecting a [`Coordinator`](crate::coordinator::Coordinator)
/// to the worker it spawned.
pub struct WorkerHandle {
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub responses: mpsc::UnboundedReceiver<WorkerResponse>,
}

pub struct ExtractionWorker {
    cache: Arc<PackageCache>,
    client: reqwest::Client,
    download: DownloadConfig,
    extraction: ExtractionConfig,
    abort_flags: DashMap<PackageKey, Arc<AtomicBool>>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
}

impl ExtractionWorker {
    /// Spawns the worker task and returns the channel ends for talking to
    /// it. The task exits when the request sender is dropped.
    pub fn spawn(
        cache: Arc<PackageCache>,
        download: DownloadConfig,
        extraction: ExtractionConfig,
    ) -> WorkerHandle {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<WorkerRequest>();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<WorkerResponse>();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(download.timeout_secs))
            .build()
            .unwrap_or_default();

        let worker = Arc::new(Self {
            cache,
            client,
            download,
            extraction,
            abort_flags: DashMap::new(),
            responses: response_tx,
        });

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                worker.clone().dispatch(request);
            }
            debug!("Extraction worker shutting down");
        });

        WorkerHandle {
            requests: request_tx,
            responses: response_rx,
        }
    }

    fn dispatch(self: Arc<Self>, request: WorkerRequest) {
        match request {
            WorkerRequest::Extract { url, key } => {
                let abort = Arc::new(AtomicBool::new(false));
                self.abort_flags.insert(key.clone(), abort.clone());
                tokio::spawn(async move {
                    self.run_extraction(url, key, abort).await;
                });
            }
            WorkerRequest::AbortExtraction { key } => {
                if let Some(flag) = self.abort_flags.get(&key) {
                    flag.store(true, Ordering::SeqCst);
                    info!(key = %key, "Abort requested for in-flight extraction");
                } else {
                    debug!(key = %key, "Abort for unknown key ignored");
                }
            }
            WorkerRequest::Invalidate { key } => {
                tokio::spawn(async move {
                    let response = match self.cache.invalidate(&key).await {
                        Ok(_) => WorkerResponse::InvalidationComplete { key },
                        Err(e) => WorkerResponse::InvalidationError {
                            key,
                            error: e.to_string(),
                        },
                    };
                    let _ = self.responses.send(response);
                });
            }
        }
    }

    #[tracing::instrument(skip(self, abort), fields(key = %key))]
    async fn run_extraction(&self, url: String, key: PackageKey, abort: Arc<AtomicBool>) {
        let started = Instant::now();
        let mut throttle = ProgressThrottle::new(
            self.extraction.progress_min_delta,
            Duration::from_millis(self.extraction.progress_min_interval_ms),
        );

        let outcome = self
            .extract_pipeline(&url, &key, &abort, started, &mut throttle)
            .await;

        self.abort_flags.remove(&key);

        match outcome {
            Ok((manifest, file_list, entry_point, timings)) => {
                info!(
                    files = file_list.len(),
                    total_ms = timings.total_ms,
                    "Extraction complete"
                );
                let _ = self.responses.send(WorkerResponse::ExtractionComplete {
                    key,
                    manifest: Box::new(manifest),
                    file_list,
                    entry_point,
                    original_url: url,
                    timings,
                });
            }
            Err(ScormError::Extraction(ExtractionError::Canceled)) => {
                info!("Extraction canceled, purging partial entry");
                if let Err(e) = self.cache.invalidate(&key).await {
                    warn!("Failed to purge canceled entry: {e}");
                }
                let _ = self
                    .responses
                    .send(WorkerResponse::ExtractionCanceled { key });
            }
            Err(e) => {
                warn!("Extraction failed: {e}");
                if let Err(purge) = self.cache.invalidate(&key).await {
                    warn!("Failed to purge partial entry: {purge}");
                }
                let _ = self.responses.send(WorkerResponse::ExtractionError {
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn extract_pipeline(
        &self,
        url: &str,
        key: &PackageKey,
        abort: &AtomicBool,
        started: Instant,
        throttle: &mut ProgressThrottle,
    ) -> Result<(Manifest, Vec<String>, String, ExtractionTimings)> {
        self.emit(key, ExtractionStage::Downloading, 0.0, None, None, None, started, throttle);

        // Download, with fixed-delay retries. A flipped abort flag makes
        // each attempt bail immediately instead of burning retries. The
        // high-water mark spans attempts so a restarted download cannot
        // report progress below what was already emitted.
        let download_started = Instant::now();
        let high_water = AtomicU64::new(0);
        let policy = RetryPolicy::fixed(self.download.retry_attempts, Duration::from_secs(1));
        let archive = policy
            .run("archive download", || {
                self.download_archive(url, key, abort, started, &high_water)
            })
            .await?;
        if abort.load(Ordering::SeqCst) {
            return Err(ExtractionError::Canceled.into());
        }
        let download_ms = download_started.elapsed().as_millis() as u64;
        let archive_size = archive.len() as u64;

        self.emit(
            key,
            ExtractionStage::Processing,
            DOWNLOAD_BAND,
            Some(archive_size),
            None,
            None,
            started,
            throttle,
        );

        // Decode on the blocking pool; zip inflation is CPU-bound.
        let decode_started = Instant::now();
        let files = tokio::task::spawn_blocking(move || decode_archive(&archive))
            .await
            .map_err(|e| ExtractionError::DecodeFailed {
                message: format!("decode task failed: {e}"),
            })??;
        if abort.load(Ordering::SeqCst) {
            return Err(ExtractionError::Canceled.into());
        }
        let decode_ms = decode_started.elapsed().as_millis() as u64;

        let manifest_xml = files
            .iter()
            .find(|(path, _)| path.eq_ignore_ascii_case("imsmanifest.xml"))
            .map(|(_, data)| data.clone())
            .ok_or(ManifestError::MissingManifest)?;
        let manifest = parse_manifest(&String::from_utf8_lossy(&manifest_xml))?;
        if manifest.version == ScormVersion::Unknown {
            return Err(ManifestError::UnsupportedVersion {
                version: "unknown".to_string(),
            }
            .into());
        }

        let mut file_list: Vec<String> = files.iter().map(|(path, _)| path.clone()).collect();
        file_list.sort();
        let entry_point = manifest.resolve_entry_point(None, &file_list)?;

        self.emit(
            key,
            ExtractionStage::Extracting,
            DECODE_BAND_END,
            Some(archive_size),
            Some(0),
            Some(files.len()),
            started,
            throttle,
        );

        // Batched cache writes; capacity is reserved up front so eviction
        // never runs concurrently with staging.
        let write_started = Instant::now();
        let total_bytes: u64 = files.iter().map(|(_, data)| data.len() as u64).sum();
        self.cache.reserve(total_bytes).await?;

        let file_count = files.len();
        let mut processed = 0usize;
        for batch in files.chunks(self.extraction.batch_size) {
            if abort.load(Ordering::SeqCst) {
                return Err(ExtractionError::Canceled.into());
            }
            let writes = batch.iter().map(|(path, data)| {
                self.cache
                    .stage_file(key, path, FileBlob::new(path, data.clone()))
            });
            for result in join_all(writes).await {
                result?;
            }
            processed += batch.len();
            let progress = DECODE_BAND_END
                + (1.0 - DECODE_BAND_END) * processed as f64 / file_count.max(1) as f64;
            self.emit(
                key,
                ExtractionStage::Extracting,
                progress,
                Some(archive_size),
                Some(processed),
                Some(file_count),
                started,
                throttle,
            );
        }

        let mut entry_point_final = entry_point;
        if !file_list.iter().any(|f| f == &entry_point_final) {
            // resolve_entry_point already falls back; this only trips when
            // the manifest href points outside the archive.
            entry_point_final = manifest.resolve_entry_point(None, &file_list)?;
        }

        let package = ExtractedPackage {
            key: key.clone(),
            version: manifest.version,
            manifest: manifest.clone(),
            files: HashMap::new(),
            file_list: file_list.clone(),
            original_url: url.to_string(),
            extracted_at: Utc::now(),
        };
        self.cache.commit(&package, total_bytes).await?;
        let write_ms = write_started.elapsed().as_millis() as u64;

        let timings = ExtractionTimings {
            download_ms,
            decode_ms,
            write_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };
        Ok((manifest, file_list, entry_point_final, timings))
    }

    /// Streams the archive body into memory, reporting progress within the
    /// download band when the server provides a content length. Reported
    /// values are clamped against `high_water`, which the caller keeps
    /// alive across retry attempts.
    async fn download_archive(
        &self,
        url: &str,
        key: &PackageKey,
        abort: &AtomicBool,
        started: Instant,
        high_water: &AtomicU64,
    ) -> Result<Vec<u8>> {
        if abort.load(Ordering::SeqCst) {
            return Err(ExtractionError::Canceled.into());
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExtractionError::DownloadFailed {
                message: e.to_string(),
            })?;

        let content_length = response.content_length();
        let mut body = Vec::with_capacity(content_length.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        let mut throttle = ProgressThrottle::new(
            self.extraction.progress_min_delta,
            Duration::from_millis(self.extraction.progress_min_interval_ms),
        );

        while let Some(chunk) = stream.next().await {
            if abort.load(Ordering::SeqCst) {
                return Err(ExtractionError::Canceled.into());
            }
            let chunk = chunk.map_err(|e| ExtractionError::DownloadFailed {
                message: e.to_string(),
            })?;
            body.extend_from_slice(&chunk);

            if let Some(total) = content_length
                && total > 0
            {
                let raw = DOWNLOAD_BAND * body.len() as f64 / total as f64;
                let progress = monotone(raw, high_water);
                if throttle.should_emit(progress, false) {
                    let _ = self.responses.send(WorkerResponse::ExtractionProgress {
                        key: key.clone(),
                        stage: ExtractionStage::Downloading,
                        progress,
                        total_size: Some(total),
                        processed_files: None,
                        file_count: None,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        Ok(body)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        key: &PackageKey,
        stage: ExtractionStage,
        progress: f64,
        total_size: Option<u64>,
        processed_files: Option<usize>,
        file_count: Option<usize>,
        started: Instant,
        throttle: &mut ProgressThrottle,
    ) {
        if throttle.should_emit(progress, stage.is_terminal()) {
            let _ = self.responses.send(WorkerResponse::ExtractionProgress {
                key: key.clone(),
                stage,
                progress,
                total_size,
                processed_files,
                file_count,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
    }
}

/// Clamps a raw progress fraction against the highest value seen so far,
/// advancing the mark when `raw` exceeds it. A download attempt restarting
/// from zero after a mid-stream failure keeps reporting the mark instead of
/// regressing.
fn monotone(raw: f64, high_water: &AtomicU64) -> f64 {
    let seen = f64::from_bits(high_water.load(Ordering::Relaxed));
    if raw > seen {
        high_water.store(raw.to_bits(), Ordering::Relaxed);
        raw
    } else {
        seen
    }
}

/// Inflates a zip archive fully in memory.
///
/// Entry names are sanitized through `enclosed_name` so hostile archives
/// cannot escape the package root, and paths are normalized relative to the
/// directory containing the shallowest `imsmanifest.xml`, since authoring
/// tools often wrap the content in a single top-level folder.
fn decode_archive(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractionError::DecodeFailed {
            message: e.to_string(),
        })?;

    let mut files = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExtractionError::DecodeFailed {
                message: e.to_string(),
            })?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry.enclosed_name() else {
            warn!(name = entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };
        let path = path.to_string_lossy().replace('\\', "/");
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ExtractionError::DecodeFailed {
                message: e.to_string(),
            })?;
        files.push((path, data));
    }

    // Locate the shallowest manifest and strip its parent directory from
    // every path so the manifest sits at the package root.
    let manifest_prefix = files
        .iter()
        .filter(|(path, _)| {
            path.rsplit('/')
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case("imsmanifest.xml"))
        })
        .map(|(path, _)| &path[..path.rfind('/').map_or(0, |i| i + 1)])
        .min_by_key(|prefix| prefix.len())
        .map(str::to_string);

    if let Some(prefix) = manifest_prefix
        && !prefix.is_empty()
    {
        for (path, _) in &mut files {
            if let Some(stripped) = path.strip_prefix(&prefix) {
                *path = stripped.to_string();
            }
        }
    }

    Ok(files)
}

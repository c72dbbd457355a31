//! Progress tracking for package extraction operations.
//!
//! Provides the per-key progress record, the throttling policy applied at
//! the engine/display/logging layers, and a callback system usable by both
//! UI consumers and servers streaming events onward.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stage of an extraction, in state-machine order.
///
/// `Complete`, `Error`, and `Canceled` are terminal: exactly one of them
/// ends every extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    Idle,
    Downloading,
    Processing,
    Extracting,
    Complete,
    Error,
    Canceled,
}

impl ExtractionStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExtractionStage::Complete | ExtractionStage::Error | ExtractionStage::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStage::Idle => "idle",
            ExtractionStage::Downloading => "downloading",
            ExtractionStage::Processing => "processing",
            ExtractionStage::Extracting => "extracting",
            ExtractionStage::Complete => "complete",
            ExtractionStage::Error => "error",
            ExtractionStage::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot for one extraction key.
///
/// `progress` is in `[0, 1]` and never decreases until a terminal stage;
/// [`ProgressRecord::update`] clamps regressions away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub progress: f64,
    pub stage: ExtractionStage,
    pub processed_files: Option<usize>,
    pub file_count: Option<usize>,
    pub total_size: Option<u64>,
    pub elapsed_ms: u64,
}

impl ProgressRecord {
    pub fn new() -> Self {
        Self {
            progress: 0.0,
            stage: ExtractionStage::Idle,
            processed_files: None,
            file_count: None,
            total_size: None,
            elapsed_ms: 0,
        }
    }

    /// Applies an update, keeping `progress` monotonic for non-terminal
    /// stages.
    pub fn update(&mut self, stage: ExtractionStage, progress: f64, elapsed_ms: u64) {
        self.stage = stage;
        self.elapsed_ms = elapsed_ms;
        let clamped = progress.clamp(0.0, 1.0);
        if stage.is_terminal() || clamped > self.progress {
            self.progress = clamped;
        }
    }
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides whether a progress value is worth emitting.
///
/// A value passes when the delta since the last emitted value reaches
/// `min_delta`, or `min_interval` has elapsed since the last emission.
/// Terminal values always pass. The same policy is applied independently at
/// the engine (1% / 250ms), display (2% / 250ms), and logging (5% / 1000ms)
/// layers.
#[derive(Debug)]
pub struct ProgressThrottle {
    min_delta: f64,
    min_interval: Duration,
    last_value: Option<f64>,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_delta: f64, min_interval: Duration) -> Self {
        Self {
            min_delta,
            min_interval,
            last_value: None,
            last_emit: None,
        }
    }

    /// Returns true when `progress` should be emitted, recording the
    /// emission when it passes.
    pub fn should_emit(&mut self, progress: f64, terminal: bool) -> bool {
        let now = Instant::now();
        let pass = terminal
            || match (self.last_value, self.last_emit) {
                (None, _) => true,
                (Some(last), Some(at)) => {
                    (progress - last).abs() >= self.min_delta
                        || now.duration_since(at) >= self.min_interval
                }
                (Some(last), None) => (progress - last).abs() >= self.min_delta,
            };

        if pass {
            self.last_value = Some(progress);
            self.last_emit = Some(now);
        }
        pass
    }
}

/// Event types for extraction progress fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionEvent {
    /// Extraction started for a key.
    Started { key: String },
    /// Throttled progress update.
    Progress { key: String, record: ProgressRecord },
    /// Extraction finished successfully.
    Completed {
        key: String,
        file_count: usize,
        duration_ms: u64,
    },
    /// Extraction failed.
    Failed { key: String, message: String },
    /// Extraction was canceled by an abort request.
    Canceled { key: String },
}

/// Trait for receiving extraction progress events.
///
/// Implementors can handle events for UI updates, logging, or streaming to
/// clients. Callbacks are invoked from async contexts and must not block.
pub trait ProgressCallback: Send + Sync {
    fn on_event(&self, event: ExtractionEvent);
}

/// A callback that stores events in a vector. Useful for testing or
/// collecting all events.
#[derive(Default)]
pub struct CollectingCallback {
    events: std::sync::Mutex<Vec<ExtractionEvent>>,
}

impl CollectingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExtractionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressCallback for CollectingCallback {
    fn on_event(&self, event: ExtractionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A callback that wraps a function.
pub struct FnCallback<F: Fn(ExtractionEvent) + Send + Sync> {
    callback: F,
}

impl<F: Fn(ExtractionEvent) + Send + Sync> FnCallback<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: Fn(ExtractionEvent) + Send + Sync> ProgressCallback for FnCallback<F> {
    fn on_event(&self, event: ExtractionEvent) {
        (self.callback)(event);
    }
}

/// A callback that sends events through a tokio mpsc channel. Useful for
/// single-consumer scenarios.
pub struct ChannelCallback {
    sender: tokio::sync::mpsc::UnboundedSender<ExtractionEvent>,
}

impl ChannelCallback {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ExtractionEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressCallback for ChannelCallback {
    fn on_event(&self, event: ExtractionEvent) {
        let _ = self.sender.send(event);
    }
}

/// Shared handle used when several layers hold the same callback.
pub type SharedCallback = Arc<dyn ProgressCallback>;

//! Runtime tracking API shim
//!
//! Implements the host side of the content runtime API: a per-launch
//! session holding the data model, validated against the vocabulary of the
//! package's SCORM version, with commits pushed to a
//! [`TrackingBackend`](crate::remote::TrackingBackend). Sessions follow the
//! initialize/initialized/terminated state machine; calls outside the
//! initialized state fail with the matching [`TrackingError`].

use crate::config::TrackingConfig;
use crate::error::{Result, TrackingError};
use crate::manifest::ScormVersion;
use crate::remote::{CommitPayload, TrackingBackend, TrackingRecord};
use crate::retry::RetryPolicy;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Writable element prefixes for SCORM 1.2.
const ELEMENTS_1_2: &[&str] = &[
    "cmi.core.lesson_location",
    "cmi.core.lesson_status",
    "cmi.core.score.raw",
    "cmi.core.score.min",
    "cmi.core.score.max",
    "cmi.core.exit",
    "cmi.core.session_time",
    "cmi.suspend_data",
    "cmi.launch_data",
    "cmi.comments",
    "cmi.objectives.",
    "cmi.interactions.",
];

/// Writable element prefixes for SCORM 2004.
const ELEMENTS_2004: &[&str] = &[
    "cmi.location",
    "cmi.completion_status",
    "cmi.success_status",
    "cmi.score.scaled",
    "cmi.score.raw",
    "cmi.score.min",
    "cmi.score.max",
    "cmi.progress_measure",
    "cmi.exit",
    "cmi.session_time",
    "cmi.suspend_data",
    "cmi.objectives.",
    "cmi.interactions.",
    "adl.nav.request",
];

const LESSON_STATUS_1_2: &[&str] = &[
    "passed",
    "completed",
    "failed",
    "incomplete",
    "browsed",
    "not attempted",
];

const COMPLETION_STATUS_2004: &[&str] = &["completed", "incomplete", "not attempted", "unknown"];
const SUCCESS_STATUS_2004: &[&str] = &["passed", "failed", "unknown"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotInitialized,
    Initialized,
    Terminated,
}

/// A data model element changed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModelChange {
    pub key: String,
    pub value: String,
}

struct SessionInner {
    state: SessionState,
    data: HashMap<String, String>,
    dirty: bool,
    started_at: Option<Instant>,
}

/// One content launch's tracking session.
pub struct TrackingSession {
    session_id: String,
    course_id: String,
    version: ScormVersion,
    config: TrackingConfig,
    backend: Arc<dyn TrackingBackend>,
    inner: Mutex<SessionInner>,
    changes: broadcast::Sender<DataModelChange>,
}

impl TrackingSession {
    pub fn new(
        session_id: impl Into<String>,
        course_id: impl Into<String>,
        version: ScormVersion,
        config: TrackingConfig,
        backend: Arc<dyn TrackingBackend>,
    ) -> Self {
        let (changes, _) = broadcast::channel(128);
        Self {
            session_id: session_id.into(),
            course_id: course_id.into(),
            version,
            config,
            backend,
            inner: Mutex::new(SessionInner {
                state: SessionState::NotInitialized,
                data: HashMap::new(),
                dirty: false,
                started_at: None,
            }),
            changes,
        }
    }

    /// Locates a tracking backend with retries, then builds the session and
    /// seeds its data model from the learner's stored record.
    ///
    /// Content can start calling the runtime API before the host has its
    /// backend ready, so binding polls `locate` a few times before giving
    /// up with `BindFailed`.
    pub async fn bind<F>(
        session_id: impl Into<String>,
        course_id: impl Into<String>,
        version: ScormVersion,
        config: TrackingConfig,
        mut locate: F,
    ) -> Result<Self>
    where
        F: FnMut() -> Option<Arc<dyn TrackingBackend>>,
    {
        let session_id = session_id.into();
        let course_id = course_id.into();
        let attempts = config.bind_attempts.max(1);
        let delay = Duration::from_millis(config.bind_delay_ms);

        for attempt in 1..=attempts {
            if let Some(backend) = locate() {
                debug!(attempt, "Tracking backend bound");
                let session = Self::new(session_id, course_id, version, config, backend);
                session.restore().await;
                return Ok(session);
            }
            if attempt < attempts {
                debug!(attempt, "Tracking backend not ready, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(TrackingError::BindFailed { attempts }.into())
    }

    /// Seeds the data model from the backend's stored record for this
    /// learner and course. A missing record, or a backend that cannot serve
    /// one right now, leaves the session at "not attempted"; launch never
    /// blocks on the read path.
    async fn restore(&self) {
        let record = match self.backend.load(&self.session_id, &self.course_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(session = %self.session_id, "Stored tracking record unavailable: {e}");
                None
            }
        };

        let (status_element, location_element, score_element) = match self.version {
            ScormVersion::V2004 => ("cmi.completion_status", "cmi.location", "cmi.score.raw"),
            _ => (
                "cmi.core.lesson_status",
                "cmi.core.lesson_location",
                "cmi.core.score.raw",
            ),
        };

        let mut inner = self.inner.lock().unwrap();
        match record {
            Some(record) => {
                debug!(session = %self.session_id, "Restoring stored tracking data");
                inner.data.extend(record.data_blob);
                inner
                    .data
                    .entry(status_element.to_string())
                    .or_insert(record.completion_status);
                if let Some(location) = record.location {
                    inner
                        .data
                        .entry(location_element.to_string())
                        .or_insert(location);
                }
                if let Some(score) = record.score {
                    inner
                        .data
                        .entry(score_element.to_string())
                        .or_insert_with(|| score.to_string());
                }
            }
            None => {
                inner
                    .data
                    .insert(status_element.to_string(), "not attempted".to_string());
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    /// Subscribe to data model changes made through [`set_value`].
    ///
    /// [`set_value`]: TrackingSession::set_value
    pub fn subscribe(&self) -> broadcast::Receiver<DataModelChange> {
        self.changes.subscribe()
    }

    /// Starts the session. Fails when already initialized or terminated.
    pub fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            SessionState::Initialized => Err(TrackingError::AlreadyInitialized.into()),
            SessionState::Terminated => Err(TrackingError::Terminated.into()),
            SessionState::NotInitialized => {
                inner.state = SessionState::Initialized;
                inner.started_at = Some(Instant::now());
                info!(session = %self.session_id, "Tracking session initialized");
                Ok(())
            }
        }
    }

    /// Reads an element, returning the empty string for valid elements that
    /// were never written.
    pub fn get_value(&self, element: &str) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        self.check_initialized(&inner)?;
        self.check_element(element)?;
        Ok(inner.data.get(element).cloned().unwrap_or_default())
    }

    /// Writes an element after validating it against the session's version
    /// vocabulary, and broadcasts the change.
    pub fn set_value(&self, element: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.check_initialized(&inner)?;
        self.check_element(element)?;
        self.check_vocabulary(element, value)?;

        inner.data.insert(element.to_string(), value.to_string());
        inner.dirty = true;
        drop(inner);

        let _ = self.changes.send(DataModelChange {
            key: element.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    /// Pushes the current data model to the backend.
    ///
    /// The elapsed session time is stamped into the data first, formatted
    /// per version. Persistence retries with exponential backoff; if every
    /// attempt fails the error is logged and swallowed so a flaky backend
    /// cannot take down the content's runtime calls.
    pub async fn commit(&self) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            self.check_initialized(&inner)?;

            let elapsed = inner
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or_default();
            let (element, formatted) = match self.version {
                ScormVersion::V2004 => ("cmi.session_time", format_iso8601_duration(elapsed)),
                _ => ("cmi.core.session_time", format_hms(elapsed)),
            };
            inner.data.insert(element.to_string(), formatted);
            inner.dirty = false;
            inner.data.clone()
        };

        let payload = CommitPayload {
            session_id: self.session_id.clone(),
            course_id: self.course_id.clone(),
            data: snapshot,
            committed_at: Utc::now(),
        };

        let policy = RetryPolicy::exponential(
            self.config.persist_retry_attempts,
            Duration::from_millis(self.config.persist_backoff_ms),
        );
        let backend = &self.backend;
        if let Err(e) = policy
            .run("tracking persist", || backend.persist(&payload))
            .await
        {
            warn!(session = %self.session_id, "Tracking commit dropped: {e}");
        }
        Ok(())
    }

    /// Commits outstanding data and closes the session. Further runtime
    /// calls fail with `Terminated`.
    pub async fn terminate(&self) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            self.check_initialized(&inner)?;
        }
        self.commit().await?;

        let mut inner = self.inner.lock().unwrap();
        inner.state = SessionState::Terminated;
        info!(session = %self.session_id, "Tracking session terminated");
        Ok(())
    }

    /// Spawns the recurring auto-commit task when configured. The task
    /// exits once the session leaves the initialized state.
    pub fn start_auto_commit(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.auto_commit_secs == 0 {
            return None;
        }
        let session = self.clone();
        let period = Duration::from_secs(self.config.auto_commit_secs);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if session.state() != SessionState::Initialized {
                    break;
                }
                let dirty = session.inner.lock().unwrap().dirty;
                if dirty && session.commit().await.is_err() {
                    break;
                }
            }
        }))
    }

    fn check_initialized(&self, inner: &SessionInner) -> Result<()> {
        match inner.state {
            SessionState::Initialized => Ok(()),
            SessionState::NotInitialized => Err(TrackingError::NotInitialized.into()),
            SessionState::Terminated => Err(TrackingError::Terminated.into()),
        }
    }

    fn check_element(&self, element: &str) -> Result<()> {
        let table = match self.version {
            ScormVersion::V2004 => ELEMENTS_2004,
            _ => ELEMENTS_1_2,
        };
        let valid = table.iter().any(|entry| {
            if entry.ends_with('.') {
                element.starts_with(entry) && element.len() > entry.len()
            } else {
                element == *entry
            }
        });
        if valid {
            Ok(())
        } else {
            Err(TrackingError::InvalidElement {
                key: element.to_string(),
            }
            .into())
        }
    }

    fn check_vocabulary(&self, element: &str, value: &str) -> Result<()> {
        let vocabulary = match element {
            "cmi.core.lesson_status" => LESSON_STATUS_1_2,
            "cmi.completion_status" => COMPLETION_STATUS_2004,
            "cmi.success_status" => SUCCESS_STATUS_2004,
            _ => return Ok(()),
        };
        if vocabulary.contains(&value) {
            Ok(())
        } else {
            Err(TrackingError::InvalidElement {
                key: format!("{element}={value}"),
            }
            .into())
        }
    }
}

/// Formats a duration as a SCORM 2004 ISO 8601 timespan, e.g. `PT1H5M2.5S`.
fn format_iso8601_duration(duration: Duration) -> String {
    let total = duration.as_secs_f64();
    let hours = (total / 3600.0) as u64;
    let minutes = ((total % 3600.0) / 60.0) as u64;
    let seconds = total % 60.0;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if seconds >= 0.1 {
        out.push_str(&format!("{seconds:.1}S"));
    } else if hours == 0 && minutes == 0 {
        out.push_str("0S");
    }
    out
}

/// Formats a duration as a SCORM 1.2 timespan, `HHHH:MM:SS`.
fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

//! Process-wide pipeline state shared by the capture and summary loops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
struct Session {
    started_at: Option<DateTime<Utc>>,
    cursor: Option<DateTime<Utc>>,
}

/// Recording flag, capture counter and summarization cursor.
///
/// Not persisted. The cursor is seeded at startup from the end of the latest
/// stored summary and only moves forward.
#[derive(Debug, Default)]
pub struct PipelineState {
    recording: AtomicBool,
    screenshots: AtomicU64,
    session: Mutex<Session>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State whose cursor resumes after an earlier run.
    pub fn with_cursor(cursor: Option<DateTime<Utc>>) -> Self {
        let state = Self::default();
        if let Some(cursor) = cursor {
            state.advance_cursor(cursor);
        }
        state
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Set the recording flag and return its previous value.
    pub fn set_recording(&self, recording: bool) -> bool {
        self.recording.swap(recording, Ordering::SeqCst)
    }

    /// Successful captures since the current session started.
    pub fn screenshots_count(&self) -> u64 {
        self.screenshots.load(Ordering::SeqCst)
    }

    /// Count one successful capture and return the new total.
    pub fn record_capture(&self) -> u64 {
        self.screenshots.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start a new recording session at `now`, resetting the counter.
    pub fn begin_session(&self, now: DateTime<Utc>) {
        self.screenshots.store(0, Ordering::SeqCst);
        self.lock().started_at = Some(now);
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.lock().cursor
    }

    /// Move the cursor to `to`. Moving it backwards is ignored.
    pub fn advance_cursor(&self, to: DateTime<Utc>) {
        let mut session = self.lock();
        if session.cursor.map_or(true, |current| to > current) {
            session.cursor = Some(to);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Focus interval tracking
//!
//! An [`IntervalTracker`] records that the reader has been engaged with one
//! subject since a given instant. Opening a new subject closes the previous
//! one; re-opening the same subject is ignored so that repeated or bubbled
//! signals do not reset the start time.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::EventKind;

/// An interval that has just been closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedInterval {
    /// Event kind of the tracker that produced this interval
    pub kind: EventKind,
    pub subject_id: String,
    pub duration: Duration,
}

impl ClosedInterval {
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone)]
struct OpenInterval {
    subject_id: String,
    started_at: Instant,
}

/// Single-subject focus interval.
///
/// The subject and start instant live in one `Option`, so an interval is
/// either fully open or fully closed.
#[derive(Debug, Clone)]
pub struct IntervalTracker {
    kind: EventKind,
    open: Option<OpenInterval>,
}

impl IntervalTracker {
    /// Create a tracker whose closed intervals are reported as `kind`
    pub fn new(kind: EventKind) -> Self {
        Self { kind, open: None }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn active_subject(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.subject_id.as_str())
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.open.as_ref().map(|open| open.started_at)
    }

    /// Open an interval for `subject_id` at `now`.
    ///
    /// Returns the interval that had to be closed to make room, if any.
    /// Re-entering the currently open subject changes nothing.
    pub fn begin(&mut self, subject_id: &str, now: Instant) -> Option<ClosedInterval> {
        if self.active_subject() == Some(subject_id) {
            return None;
        }

        let closed = self.end(now);
        self.open = Some(OpenInterval {
            subject_id: subject_id.to_string(),
            started_at: now,
        });
        closed
    }

    /// Close the open interval at `now`, if there is one
    pub fn end(&mut self, now: Instant) -> Option<ClosedInterval> {
        self.open.take().map(|open| ClosedInterval {
            kind: self.kind,
            duration: now.saturating_duration_since(open.started_at),
            subject_id: open.subject_id,
        })
    }
}

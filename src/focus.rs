//! Focus signals from the rendering layer
//!
//! The reader's UI reports what the user is doing as [`FocusSignal`]s. Any
//! UI toolkit can feed the tracker by implementing [`FocusSource`]; the
//! tracker never inspects the UI itself.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// A user-interface transition relevant to tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum FocusSignal {
    /// An article card was activated
    CardActivated { article_id: String },
    /// An article's detail view opened
    DetailOpened { article_id: String },
    /// The detail view closed
    DetailClosed,
    /// The pointer entered an article's traffic-light indicator
    IndicatorEntered { article_id: String },
    /// The pointer left the traffic-light indicator
    IndicatorLeft,
    /// The page is being unloaded
    Teardown,
}

/// Capability implemented by the rendering layer
pub trait FocusSource {
    /// Next pending signal, or `None` when nothing is queued
    fn next_signal(&mut self) -> Option<FocusSignal>;
}

impl FocusSource for VecDeque<FocusSignal> {
    fn next_signal(&mut self) -> Option<FocusSignal> {
        self.pop_front()
    }
}

/// A signal scheduled at an offset from the start of a scripted session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Milliseconds since the session started
    pub at_ms: u64,
    #[serde(flatten)]
    pub signal: FocusSignal,
}

impl ScriptStep {
    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.at_ms)
    }
}

/// An ordered, timed sequence of focus signals
#[derive(Debug, Clone, Default)]
pub struct FocusScript {
    steps: VecDeque<ScriptStep>,
}

impl FocusScript {
    /// Build a script; steps are ordered by offset, ties keep input order
    pub fn new(mut steps: Vec<ScriptStep>) -> Self {
        steps.sort_by_key(|step| step.at_ms);
        Self {
            steps: steps.into(),
        }
    }

    /// Parse newline-delimited JSON steps, skipping blank lines
    pub fn parse_ndjson(ndjson: &str) -> Result<Self, TrackError> {
        let mut steps = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let step: ScriptStep = serde_json::from_str(trimmed).map_err(|e| {
                TrackError::ParseError(format!("Line {}: {}", line_num + 1, e))
            })?;
            steps.push(step);
        }
        Ok(Self::new(steps))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Remove and return the next step with its offset
    pub fn next_step(&mut self) -> Option<ScriptStep> {
        self.steps.pop_front()
    }
}

impl FocusSource for FocusScript {
    fn next_signal(&mut self) -> Option<FocusSignal> {
        self.next_step().map(|step| step.signal)
    }
}

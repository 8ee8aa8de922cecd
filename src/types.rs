//! Tracking event types
//!
//! This module defines the events produced by the tracker and the batch
//! payload posted to the delivery webhook. Field names follow the webhook's
//! camelCase contract.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::catalog::SubjectMetadata;
use crate::error::TrackError;

/// Kinds of interaction the tracker reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An article card was activated
    ArticleClick,
    /// An article's detail view was open for a measured interval
    ArticleView,
    /// A traffic-light indicator was hovered for a measured interval
    TrafficLightHover,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ArticleClick => "article_click",
            EventKind::ArticleView => "article_view",
            EventKind::TrafficLightHover => "traffic_light_hover",
        }
    }

    /// Whether events of this kind carry a duration
    pub fn is_interval(&self) -> bool {
        !matches!(self, EventKind::ArticleClick)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article_click" => Ok(EventKind::ArticleClick),
            "article_view" => Ok(EventKind::ArticleView),
            "traffic_light_hover" => Ok(EventKind::TrafficLightHover),
            other => Err(TrackError::MalformedEvent(format!(
                "unknown eventType '{other}'"
            ))),
        }
    }
}

/// A single observed interaction, as delivered to the webhook.
///
/// `event_type` is kept as a string because events may also arrive from
/// outside the tracker (replayed NDJSON); [`TrackingEvent::validate`] guards
/// the transport against malformed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    #[serde(default)]
    pub event_type: String,
    /// ISO-8601 UTC timestamp with millisecond precision
    #[serde(default)]
    pub timestamp: String,
    /// Participant identifier, empty for anonymous sessions
    #[serde(default)]
    pub participant_id: String,
    #[serde(default)]
    pub article_id: String,
    /// Traffic-light status of the article, empty when unknown
    #[serde(default)]
    pub traffic_light_status: String,
    /// Misleading score of the article; serialized as `""` when unknown
    #[serde(
        default,
        serialize_with = "serialize_score",
        deserialize_with = "deserialize_score"
    )]
    pub misleading_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TrackingEvent {
    /// Build a duration-less click event
    pub fn click(
        participant_id: &str,
        article_id: &str,
        metadata: Option<&SubjectMetadata>,
    ) -> Self {
        Self::build(EventKind::ArticleClick, participant_id, article_id, metadata)
    }

    /// Build an interval-closing event carrying `duration`
    pub fn interval(
        kind: EventKind,
        participant_id: &str,
        article_id: &str,
        duration: Duration,
        metadata: Option<&SubjectMetadata>,
    ) -> Self {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut event = Self::build(kind, participant_id, article_id, metadata);
        event.duration_ms = Some(duration_ms);
        event.duration_seconds = Some(round_ms_to_seconds(duration_ms));
        event
    }

    fn build(
        kind: EventKind,
        participant_id: &str,
        article_id: &str,
        metadata: Option<&SubjectMetadata>,
    ) -> Self {
        Self {
            event_type: kind.as_str().to_string(),
            timestamp: iso_timestamp_now(),
            participant_id: participant_id.to_string(),
            article_id: article_id.to_string(),
            traffic_light_status: metadata
                .map(|m| m.status_tag.clone())
                .unwrap_or_default(),
            misleading_score: metadata.and_then(|m| m.numeric_score),
            duration_seconds: None,
            duration_ms: None,
        }
    }

    /// Parsed event kind, if the event type is recognized
    pub fn kind(&self) -> Option<EventKind> {
        self.event_type.parse().ok()
    }

    /// Check that the event may be handed to a transport.
    ///
    /// Only a missing or blank `eventType` is fatal: the receiver stores any
    /// type string it is given.
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.event_type.trim().is_empty() {
            return Err(TrackError::MalformedEvent(format!(
                "event for article '{}' is missing eventType",
                self.article_id
            )));
        }
        Ok(())
    }
}

/// Batch body posted to the webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub events: Vec<TrackingEvent>,
    #[serde(default)]
    pub participant_id: String,
}

impl DeliveryPayload {
    /// Wrap one event in a single-element batch
    pub fn single(event: TrackingEvent, participant_id: &str) -> Self {
        Self {
            events: vec![event],
            participant_id: participant_id.to_string(),
        }
    }
}

/// Round a millisecond duration to whole seconds, halves rounding up
pub fn round_ms_to_seconds(duration_ms: u64) -> u64 {
    duration_ms.saturating_add(500) / 1000
}

/// Current time in the `YYYY-MM-DDTHH:MM:SS.sssZ` form
pub fn iso_timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_score<S>(score: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match score {
        Some(value) => serializer.serialize_u32(*value),
        None => serializer.serialize_str(""),
    }
}

fn deserialize_score<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

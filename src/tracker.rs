//! Interaction tracker
//!
//! [`InteractionTracker`] is the object the rendering layer talks to. It owns
//! the session identity, the article catalog, one interval tracker for
//! detail-view reading and one for indicator hovering, and the emitter that
//! delivers the resulting events.
//!
//! All methods return immediately; delivery happens in the background.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::catalog::ArticleCatalog;
use crate::config::TrackerConfig;
use crate::emitter::{DeliveryStatsSnapshot, Dispatch, Emitter};
use crate::error::TrackError;
use crate::focus::{FocusScript, FocusSignal, FocusSource};
use crate::interval::{ClosedInterval, IntervalTracker};
use crate::session::Session;
use crate::transport::{Transport, WebhookTransport};
use crate::types::{EventKind, TrackingEvent};

/// Tracks reading, hovering and clicks for one reader session
pub struct InteractionTracker<T: Transport = WebhookTransport> {
    session: Session,
    catalog: Arc<ArticleCatalog>,
    emitter: Emitter<T>,
    reading: IntervalTracker,
    attention: IntervalTracker,
}

impl InteractionTracker<WebhookTransport> {
    /// Build a tracker delivering to the configured webhook.
    ///
    /// Without a webhook URL the tracker still runs but discards its events.
    pub fn from_config(
        config: &TrackerConfig,
        session: Session,
        catalog: Arc<ArticleCatalog>,
    ) -> Result<Self, TrackError> {
        let transport = config
            .webhook_url
            .as_deref()
            .map(|url| WebhookTransport::new(url, config.request_timeout))
            .transpose()?;

        info!(
            session = session.instance_id(),
            participant = session.participant_label(),
            delivery_enabled = transport.is_some(),
            articles = catalog.len(),
            "interaction tracker ready"
        );

        let emitter = Emitter::new(transport, config.retry_policy(), session.participant_label())?;
        Ok(Self::new(session, catalog, emitter))
    }
}

impl<T: Transport> InteractionTracker<T> {
    pub fn new(session: Session, catalog: Arc<ArticleCatalog>, emitter: Emitter<T>) -> Self {
        Self {
            session,
            catalog,
            emitter,
            reading: IntervalTracker::new(EventKind::ArticleView),
            attention: IntervalTracker::new(EventKind::TrafficLightHover),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn emitter(&self) -> &Emitter<T> {
        &self.emitter
    }

    /// Detail-view reading interval
    pub fn reading(&self) -> &IntervalTracker {
        &self.reading
    }

    /// Indicator hover interval
    pub fn attention(&self) -> &IntervalTracker {
        &self.attention
    }

    /// Report an article card activation. Blank identifiers are ignored.
    pub fn report_click(&self, article_id: &str) -> Option<Dispatch> {
        let article_id = article_id.trim();
        if article_id.is_empty() {
            return None;
        }

        let metadata = self.catalog.lookup(Some(article_id));
        let event = TrackingEvent::click(
            self.session.participant_label(),
            article_id,
            metadata.as_ref(),
        );
        Some(self.emitter.send(event))
    }

    /// The detail view for `article_id` opened
    pub fn begin_focus(&mut self, article_id: &str) {
        let now = Instant::now();
        if let Some(closed) = open_interval(&mut self.reading, article_id, now) {
            self.emit_interval(closed);
        }
    }

    /// The detail view closed
    pub fn end_focus(&mut self) {
        if let Some(closed) = self.reading.end(Instant::now()) {
            self.emit_interval(closed);
        }
    }

    /// The pointer entered the traffic-light indicator of `article_id`
    pub fn begin_hover(&mut self, article_id: &str) {
        let now = Instant::now();
        if let Some(closed) = open_interval(&mut self.attention, article_id, now) {
            self.emit_interval(closed);
        }
    }

    /// The pointer left the traffic-light indicator
    pub fn end_hover(&mut self) {
        if let Some(closed) = self.attention.end(Instant::now()) {
            self.emit_interval(closed);
        }
    }

    /// Close every open interval before the page goes away.
    ///
    /// Event construction and dispatch happen before this returns; whether
    /// the deliveries complete depends on how long the runtime stays alive
    /// (see [`InteractionTracker::shutdown`]). Returns the number of events
    /// flushed.
    pub fn flush_on_teardown(&mut self) -> usize {
        let now = Instant::now();
        let mut flushed = 0;

        if let Some(closed) = self.reading.end(now) {
            self.emit_interval(closed);
            flushed += 1;
        }
        if let Some(closed) = self.attention.end(now) {
            self.emit_interval(closed);
            flushed += 1;
        }

        info!(
            session = self.session.instance_id(),
            flushed,
            pending = self.emitter.pending(),
            "tracker torn down"
        );
        flushed
    }

    /// Apply one signal from the rendering layer
    pub fn handle(&mut self, signal: FocusSignal) {
        debug!(?signal, "focus signal");
        match signal {
            FocusSignal::CardActivated { article_id } => {
                self.report_click(&article_id);
            }
            FocusSignal::DetailOpened { article_id } => self.begin_focus(&article_id),
            FocusSignal::DetailClosed => self.end_focus(),
            FocusSignal::IndicatorEntered { article_id } => self.begin_hover(&article_id),
            FocusSignal::IndicatorLeft => self.end_hover(),
            FocusSignal::Teardown => {
                self.flush_on_teardown();
            }
        }
    }

    /// Apply every signal currently queued in `source`; returns how many
    pub fn consume<S: FocusSource>(&mut self, source: &mut S) -> usize {
        let mut handled = 0;
        while let Some(signal) = source.next_signal() {
            self.handle(signal);
            handled += 1;
        }
        handled
    }

    /// Play a timed script in real time, honouring each step's offset
    pub async fn play(&mut self, mut script: FocusScript) -> usize {
        let started = Instant::now();
        let mut handled = 0;
        while let Some(step) = script.next_step() {
            tokio::time::sleep_until(started + step.offset()).await;
            self.handle(step.signal);
            handled += 1;
        }
        handled
    }

    /// Flush open intervals, then wait up to `grace` for deliveries
    pub async fn shutdown(&mut self, grace: Duration) -> DeliveryStatsSnapshot {
        self.flush_on_teardown();
        self.emitter.shutdown(grace).await
    }

    fn emit_interval(&self, closed: ClosedInterval) -> Dispatch {
        let metadata = self.catalog.lookup(Some(&closed.subject_id));
        debug!(
            event_type = %closed.kind,
            article_id = %closed.subject_id,
            duration_ms = closed.duration_ms(),
            "interval closed"
        );
        let event = TrackingEvent::interval(
            closed.kind,
            self.session.participant_label(),
            &closed.subject_id,
            closed.duration,
            metadata.as_ref(),
        );
        self.emitter.send(event)
    }
}

/// Blank identifiers never open an interval
fn open_interval(
    tracker: &mut IntervalTracker,
    article_id: &str,
    now: Instant,
) -> Option<ClosedInterval> {
    let article_id = article_id.trim();
    if article_id.is_empty() {
        return None;
    }
    tracker.begin(article_id, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::RetryPolicy;
    use crate::transport::testing::RecordingTransport;
    use crate::types::DeliveryPayload;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    fn sample_catalog() -> Arc<ArticleCatalog> {
        let json = r#"[
            {"id": 1, "title": "Budget vote passes",
             "trafficLightStatus": "green", "misleadingScore": 23},
            {"id": 5, "title": "Celebrity diet",
             "trafficLightStatus": "red", "misleadingScore": 88}
        ]"#;
        Arc::new(ArticleCatalog::from_json(json).unwrap())
    }

    fn tracker_with(
        transport: &RecordingTransport,
        launch: &str,
    ) -> InteractionTracker<RecordingTransport> {
        let session = Session::from_launch(launch);
        let emitter = Emitter::new(
            Some(transport.clone()),
            RetryPolicy::new(3, Duration::from_millis(1000)),
            session.participant_label(),
        )
        .unwrap();
        InteractionTracker::new(session, sample_catalog(), emitter)
    }

    async fn delivered(
        tracker: &InteractionTracker<RecordingTransport>,
        transport: &RecordingTransport,
    ) -> Vec<DeliveryPayload> {
        tracker.emitter().shutdown(Duration::from_secs(60)).await;
        transport.attempts().into_iter().map(|a| a.payload).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_payload_scenario() {
        let transport = RecordingTransport::new();
        let tracker = tracker_with(&transport, "https://reader.example.com/?pid=P042");

        assert_eq!(tracker.report_click("1"), Some(Dispatch::Scheduled));

        let payloads = delivered(&tracker, &transport).await;
        assert_eq!(payloads.len(), 1);

        let value = serde_json::to_value(&payloads[0]).unwrap();
        assert_eq!(value["participantId"], "P042");
        let event = &value["events"][0];
        assert_eq!(event["eventType"], "article_click");
        assert_eq!(event["articleId"], "1");
        assert_eq!(event["trafficLightStatus"], "green");
        assert_eq!(event["misleadingScore"], 23);
        assert_eq!(event["participantId"], "P042");
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_of_unknown_article_scenario() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "");

        tracker.begin_focus("2");
        tokio::time::advance(Duration::from_millis(2500)).await;
        tracker.end_focus();

        let payloads = delivered(&tracker, &transport).await;
        let value = serde_json::to_value(&payloads[0]).unwrap();
        let event = &value["events"][0];

        assert_eq!(event["eventType"], "article_view");
        assert_eq!(event["articleId"], "2");
        assert_eq!(event["durationMs"], 2500);
        assert_eq!(event["durationSeconds"], 3);
        assert_eq!(event["trafficLightStatus"], "");
        assert_eq!(event["misleadingScore"], "");
        assert_eq!(event["participantId"], "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_subjects_closes_previous_first() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "?pid=p");

        tracker.begin_focus("1");
        tokio::time::advance(Duration::from_millis(1200)).await;
        tracker.begin_focus("5");

        assert_eq!(tracker.reading().active_subject(), Some("5"));
        assert_eq!(tracker.emitter().stats().submitted, 1);

        let payloads = delivered(&tracker, &transport).await;
        assert_eq!(payloads.len(), 1);
        let event = &payloads[0].events[0];
        assert_eq!(event.article_id, "1");
        assert_eq!(event.duration_ms, Some(1200));
        assert_eq!(event.duration_seconds, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentering_same_subject_is_silent() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "");

        tracker.begin_focus("1");
        let started = tracker.reading().started_at();
        tokio::time::advance(Duration::from_millis(300)).await;
        tracker.begin_focus("1");

        assert_eq!(tracker.reading().started_at(), started);
        assert_eq!(tracker.emitter().stats().submitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_without_open_interval_emits_nothing() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "");

        tracker.end_focus();
        tracker.end_hover();

        assert!(delivered(&tracker, &transport).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_and_hover_are_independent() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "");

        tracker.begin_focus("1");
        tracker.begin_hover("5");
        tokio::time::advance(Duration::from_millis(700)).await;
        tracker.end_hover();

        assert_eq!(tracker.reading().active_subject(), Some("1"));
        assert!(!tracker.attention().is_open());

        let payloads = delivered(&tracker, &transport).await;
        let event = &payloads[0].events[0];
        assert_eq!(event.event_type, "traffic_light_hover");
        assert_eq!(event.article_id, "5");
        assert_eq!(event.traffic_light_status, "red");
        assert_eq!(event.misleading_score, Some(88));
        assert_eq!(event.duration_seconds, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_flushes_open_reading_synchronously() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "?pid=p7");

        tracker.begin_focus("1");
        tokio::time::advance(Duration::from_secs(42)).await;

        assert_eq!(tracker.flush_on_teardown(), 1);
        // Dispatch was initiated before returning
        assert_eq!(tracker.emitter().stats().submitted, 1);
        assert!(!tracker.reading().is_open());

        // A second teardown finds nothing left to flush
        assert_eq!(tracker.flush_on_teardown(), 0);

        let payloads = delivered(&tracker, &transport).await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].events[0].event_type, "article_view");
        assert_eq!(payloads[0].events[0].duration_seconds, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_ids_are_ignored() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "");

        assert_eq!(tracker.report_click("  "), None);
        tracker.begin_focus("");
        tracker.begin_hover(" ");

        assert!(!tracker.reading().is_open());
        assert!(!tracker.attention().is_open());
        assert_eq!(tracker.emitter().stats().submitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_queued_signals() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "");

        let mut queue: VecDeque<FocusSignal> = vec![
            FocusSignal::CardActivated {
                article_id: "5".to_string(),
            },
            FocusSignal::DetailOpened {
                article_id: "5".to_string(),
            },
            FocusSignal::IndicatorEntered {
                article_id: "5".to_string(),
            },
            FocusSignal::Teardown,
        ]
        .into();

        assert_eq!(tracker.consume(&mut queue), 4);

        let mut kinds: Vec<String> = delivered(&tracker, &transport)
            .await
            .into_iter()
            .map(|p| p.events[0].event_type.clone())
            .collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec!["article_click", "article_view", "traffic_light_hover"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_script_respects_offsets() {
        let transport = RecordingTransport::new();
        let mut tracker = tracker_with(&transport, "");

        let script = FocusScript::parse_ndjson(
            r#"{"at_ms": 0, "signal": "detail_opened", "article_id": "1"}
{"at_ms": 3400, "signal": "detail_closed"}"#,
        )
        .unwrap();

        assert_eq!(tracker.play(script).await, 2);
        let stats = tracker.shutdown(Duration::from_secs(60)).await;
        assert_eq!(stats.delivered, 1);

        let attempts = transport.attempts();
        assert_eq!(attempts[0].payload.events[0].duration_ms, Some(3400));
    }

    #[test]
    fn test_from_config_without_webhook_discards() {
        let config = TrackerConfig::default();
        let tracker =
            InteractionTracker::from_config(&config, Session::anonymous(), sample_catalog())
                .unwrap();

        assert!(!tracker.emitter().is_enabled());
        assert_eq!(tracker.report_click("1"), Some(Dispatch::Disabled));
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_webhook() {
        let config = TrackerConfig {
            webhook_url: Some("not a url".to_string()),
            ..TrackerConfig::default()
        };
        let result =
            InteractionTracker::from_config(&config, Session::anonymous(), sample_catalog());
        assert!(matches!(result, Err(TrackError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_config_drives_session_and_catalog() {
        let config = TrackerConfig::from_lookup(|key: &str| match key {
            "NEWSLIGHT_PARTICIPANT_PARAM" => Some("participant".to_string()),
            "NEWSLIGHT_GREEN_MAX" => Some("10".to_string()),
            "NEWSLIGHT_YELLOW_MAX" => Some("25".to_string()),
            _ => None,
        })
        .unwrap();

        let session =
            Session::from_launch_with_param("?participant=P9&pid=X", &config.participant_param);
        let catalog = ArticleCatalog::from_json_with_thresholds(
            r#"[{"id": 3, "misleadingScore": 20}]"#,
            config.thresholds,
        )
        .unwrap();

        let tracker = InteractionTracker::from_config(&config, session, Arc::new(catalog)).unwrap();
        assert_eq!(tracker.session().participant_id(), Some("P9"));
        let metadata = tracker.catalog.lookup(Some("3")).unwrap();
        assert_eq!(metadata.status_tag, "yellow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_after_cancelling_shutdown_is_refused() {
        let transport = RecordingTransport::always_failing();
        let session = Session::from_launch("?pid=p");
        let emitter = Emitter::new(
            Some(transport.clone()),
            RetryPolicy::new(3, Duration::from_secs(30)),
            session.participant_label(),
        )
        .unwrap();
        let mut tracker = InteractionTracker::new(session, sample_catalog(), emitter);

        tracker.report_click("1");
        let stats = tracker.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stats.cancelled, 1);

        assert_eq!(tracker.report_click("5"), Some(Dispatch::ShutDown));
        assert_eq!(transport.attempt_count(), 1);
        assert_eq!(tracker.emitter().stats().submitted, 1);
    }
}

//! Event delivery with exponential backoff
//!
//! [`Emitter::send`] never blocks and never fails towards its caller. Each
//! accepted event becomes one [`DeliveryAttempt`] chain owned by the
//! [`RetryScheduler`]: the first attempt runs immediately, failed attempts are
//! retried after `base_delay * 2^attempt` until `max_retries` retries have
//! been spent, after which the event is logged as lost.
//!
//! Events are delivered independently, so the receiver may see them out of
//! order. A failed attempt may still have reached the receiver; duplicates
//! are possible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use crate::error::TrackError;
use crate::transport::Transport;
use crate::types::{DeliveryPayload, TrackingEvent};

/// Retry schedule for failed deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Total attempts an event may receive
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The full backoff schedule, one delay per retry
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.delay_for(n)).collect()
    }
}

/// Retry state bound to one payload
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub payload: DeliveryPayload,
    /// 0-based attempt number
    pub attempt: u32,
}

impl DeliveryAttempt {
    pub fn first(payload: DeliveryPayload) -> Self {
        Self {
            payload,
            attempt: 0,
        }
    }

    /// The follow-up attempt and the delay before it, or `None` once the
    /// retries are exhausted
    pub fn retry(self, policy: &RetryPolicy) -> Option<(Duration, Self)> {
        if self.retries_exhausted(policy) {
            return None;
        }
        let delay = policy.delay_for(self.attempt);
        Some((
            delay,
            Self {
                payload: self.payload,
                attempt: self.attempt + 1,
            },
        ))
    }

    /// Whether a failure of this attempt ends the chain
    pub fn retries_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempt >= policy.max_retries
    }

    fn event_type(&self) -> &str {
        self.payload
            .events
            .first()
            .map(|event| event.event_type.as_str())
            .unwrap_or_default()
    }

    fn article_id(&self) -> &str {
        self.payload
            .events
            .first()
            .map(|event| event.article_id.as_str())
            .unwrap_or_default()
    }

    fn timestamp(&self) -> &str {
        self.payload
            .events
            .first()
            .map(|event| event.timestamp.as_str())
            .unwrap_or_default()
    }
}

/// How a delivery chain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Abandoned { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Result of handing an event to the emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivery has been started
    Scheduled,
    /// No endpoint is configured; the event was discarded
    Disabled,
    /// The event was malformed and never reached the transport
    Rejected,
    /// A cancelling shutdown already happened; the event was dropped
    ShutDown,
}

/// Delivery counters shared between the emitter and its tasks
#[derive(Debug, Default)]
pub struct DeliveryStats {
    submitted: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    disabled: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub submitted: u64,
    pub delivered: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub disabled: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
        }
    }

    fn record(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome(&self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered { .. } => self.record(&self.delivered),
            DeliveryOutcome::Abandoned { .. } => self.record(&self.abandoned),
            DeliveryOutcome::Cancelled { .. } => self.record(&self.cancelled),
        }
    }
}

/// Owns every pending delivery chain
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    tasks: TaskTracker,
    cancel: CancellationToken,
    handle: Handle,
}

impl RetryScheduler {
    /// Create a scheduler on the current tokio runtime
    pub fn current() -> Result<Self, TrackError> {
        let handle = Handle::try_current().map_err(|e| TrackError::NoRuntime(e.to_string()))?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
            handle,
        }
    }

    /// Start a delivery chain in the background
    pub fn schedule<T: Transport>(
        &self,
        transport: Arc<T>,
        attempt: DeliveryAttempt,
        policy: RetryPolicy,
        stats: Arc<DeliveryStats>,
    ) {
        let cancel = self.cancel.clone();
        self.tasks.spawn_on(
            async move {
                let outcome =
                    run_delivery(transport.as_ref(), attempt, policy, &stats, &cancel).await;
                stats.record_outcome(outcome);
            },
            &self.handle,
        );
    }

    /// Number of chains still running
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Stop all chains before their next attempt
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait up to `grace` for running chains, then cancel the rest.
    ///
    /// Returns `true` if every chain finished on its own.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        let finished = tokio::time::timeout(grace, self.tasks.wait()).await.is_ok();
        if !finished {
            self.cancel();
            self.tasks.wait().await;
        }
        self.tasks.reopen();
        finished
    }
}

async fn run_delivery<T: Transport>(
    transport: &T,
    mut attempt: DeliveryAttempt,
    policy: RetryPolicy,
    stats: &DeliveryStats,
    cancel: &CancellationToken,
) -> DeliveryOutcome {
    loop {
        if cancel.is_cancelled() {
            warn!(
                event_type = attempt.event_type(),
                article_id = attempt.article_id(),
                attempt = attempt.attempt,
                "delivery cancelled before attempt"
            );
            return DeliveryOutcome::Cancelled {
                attempts: attempt.attempt,
            };
        }

        let error = match transport.deliver(&attempt.payload).await {
            Ok(()) => {
                debug!(
                    event_type = attempt.event_type(),
                    article_id = attempt.article_id(),
                    attempt = attempt.attempt,
                    "event delivered"
                );
                return DeliveryOutcome::Delivered {
                    attempts: attempt.attempt + 1,
                };
            }
            Err(error) => error,
        };

        warn!(
            event_type = attempt.event_type(),
            article_id = attempt.article_id(),
            attempt = attempt.attempt,
            error = %error,
            "event delivery failed"
        );

        let attempts = attempt.attempt + 1;
        if attempt.retries_exhausted(&policy) {
            error!(
                event_type = attempt.event_type(),
                article_id = attempt.article_id(),
                timestamp = attempt.timestamp(),
                participant_id = %attempt.payload.participant_id,
                attempts,
                max_retries = policy.max_retries,
                "event lost after max retries"
            );
            return DeliveryOutcome::Abandoned { attempts };
        }
        let Some((delay, next)) = attempt.retry(&policy) else {
            return DeliveryOutcome::Abandoned { attempts };
        };

        stats.record(&stats.retried);
        debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            next_attempt = next.attempt,
            "retry scheduled"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                warn!(
                    event_type = next.event_type(),
                    article_id = next.article_id(),
                    attempts,
                    "pending retry cancelled"
                );
                return DeliveryOutcome::Cancelled { attempts };
            }
        }

        attempt = next;
    }
}

/// Transport plus the scheduler running its delivery chains
struct Delivery<T: Transport> {
    transport: Arc<T>,
    scheduler: RetryScheduler,
}

/// Best-effort event sender.
///
/// Without a transport (no endpoint configured) every event is discarded
/// quietly, and no tokio runtime is required.
pub struct Emitter<T: Transport> {
    delivery: Option<Delivery<T>>,
    policy: RetryPolicy,
    participant_id: String,
    stats: Arc<DeliveryStats>,
}

impl<T: Transport> Emitter<T> {
    /// Create an emitter. A transport binds it to the current tokio runtime.
    pub fn new(
        transport: Option<T>,
        policy: RetryPolicy,
        participant_id: &str,
    ) -> Result<Self, TrackError> {
        let Some(transport) = transport else {
            return Ok(Self::build(None, policy, participant_id));
        };
        Ok(Self::with_scheduler(
            transport,
            policy,
            participant_id,
            RetryScheduler::current()?,
        ))
    }

    pub fn with_scheduler(
        transport: T,
        policy: RetryPolicy,
        participant_id: &str,
        scheduler: RetryScheduler,
    ) -> Self {
        let delivery = Delivery {
            transport: Arc::new(transport),
            scheduler,
        };
        Self::build(Some(delivery), policy, participant_id)
    }

    /// An emitter that discards everything
    pub fn disabled(participant_id: &str) -> Self {
        Self::build(None, RetryPolicy::default(), participant_id)
    }

    fn build(delivery: Option<Delivery<T>>, policy: RetryPolicy, participant_id: &str) -> Self {
        Self {
            delivery,
            policy,
            participant_id: participant_id.to_string(),
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.delivery.is_some()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn transport(&self) -> Option<&T> {
        self.delivery.as_ref().map(|d| d.transport.as_ref())
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn pending(&self) -> usize {
        self.delivery.as_ref().map_or(0, |d| d.scheduler.pending())
    }

    /// Whether a shutdown has cancelled delivery for good
    pub fn is_shut_down(&self) -> bool {
        self.delivery.as_ref().is_some_and(|d| d.scheduler.is_cancelled())
    }

    /// Hand an event over for delivery.
    ///
    /// Returns immediately; the outcome of the delivery is only logged.
    pub fn send(&self, event: TrackingEvent) -> Dispatch {
        if let Err(e) = event.validate() {
            self.stats.record(&self.stats.rejected);
            error!(error = %e, article_id = %event.article_id, "event rejected");
            return Dispatch::Rejected;
        }

        let Some(delivery) = &self.delivery else {
            self.stats.record(&self.stats.disabled);
            debug!(event_type = %event.event_type, "delivery disabled, event discarded");
            return Dispatch::Disabled;
        };

        if delivery.scheduler.is_cancelled() {
            self.stats.record(&self.stats.cancelled);
            warn!(
                event_type = %event.event_type,
                article_id = %event.article_id,
                "emitter shut down, event dropped"
            );
            return Dispatch::ShutDown;
        }

        debug!(
            event_type = %event.event_type,
            article_id = %event.article_id,
            participant = %self.participant_id,
            "dispatching event"
        );

        self.stats.record(&self.stats.submitted);
        let payload = DeliveryPayload::single(event, &self.participant_id);
        delivery.scheduler.schedule(
            Arc::clone(&delivery.transport),
            DeliveryAttempt::first(payload),
            self.policy,
            Arc::clone(&self.stats),
        );
        Dispatch::Scheduled
    }

    /// Give in-flight deliveries up to `grace` to finish, cancel the rest.
    ///
    /// After a cancelling shutdown, later events are refused with
    /// [`Dispatch::ShutDown`].
    pub async fn shutdown(&self, grace: Duration) -> DeliveryStatsSnapshot {
        let Some(delivery) = &self.delivery else {
            return self.stats();
        };

        let pending = delivery.scheduler.pending();
        if pending > 0 {
            info!(
                pending,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "waiting for pending deliveries"
            );
        }
        if !delivery.scheduler.drain(grace).await {
            warn!("grace period elapsed, remaining deliveries cancelled");
        }
        self.stats()
    }

    /// Cancel pending retries without waiting
    pub fn cancel_pending(&self) {
        if let Some(delivery) = &self.delivery {
            delivery.scheduler.cancel();
        }
    }
}

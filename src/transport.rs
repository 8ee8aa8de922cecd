//! Delivery transports
//!
//! A [`Transport`] performs one delivery attempt. It reports only whether the
//! request left the process: the webhook's response is never read, so a
//! reported failure may still have reached the receiver.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::error::TrackError;
use crate::types::DeliveryPayload;

/// One-shot delivery of a payload
pub trait Transport: Send + Sync + 'static {
    /// Attempt delivery once. Errors mean the request could not be sent.
    fn deliver(
        &self,
        payload: &DeliveryPayload,
    ) -> impl Future<Output = Result<(), TrackError>> + Send;
}

/// Posts payloads as JSON to an HTTP webhook
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookTransport {
    /// Create a transport for `endpoint` with a per-request timeout
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TrackError> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Transport for WebhookTransport {
    async fn deliver(&self, payload: &DeliveryPayload) -> Result<(), TrackError> {
        // The status and body are deliberately dropped unread.
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| TrackError::Transport(format!("webhook request failed: {e}")))?;

        debug!(
            endpoint = %self.endpoint,
            status = response.status().as_u16(),
            events = payload.events.len(),
            "webhook request sent"
        );
        Ok(())
    }
}

/// Validate a webhook endpoint: absolute `http` or `https` URL
pub fn parse_endpoint(endpoint: &str) -> Result<Url, TrackError> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| TrackError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TrackError::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme '{other}'"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport for tests

    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct RecordedAttempt {
        pub at: Instant,
        pub payload: DeliveryPayload,
    }

    /// Records every attempt; fails the first `failures` attempts
    #[derive(Debug, Clone, Default)]
    pub struct RecordingTransport {
        attempts: Arc<Mutex<Vec<RecordedAttempt>>>,
        failures: Arc<Mutex<usize>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(failures: usize) -> Self {
            let transport = Self::default();
            *transport.failures.lock().unwrap() = failures;
            transport
        }

        pub fn always_failing() -> Self {
            Self::failing(usize::MAX)
        }

        pub fn attempts(&self) -> Vec<RecordedAttempt> {
            self.attempts.lock().unwrap().clone()
        }

        pub fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    impl Transport for RecordingTransport {
        async fn deliver(&self, payload: &DeliveryPayload) -> Result<(), TrackError> {
            self.attempts.lock().unwrap().push(RecordedAttempt {
                at: Instant::now(),
                payload: payload.clone(),
            });

            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(TrackError::Transport("connection refused".to_string()));
            }
            Ok(())
        }
    }
}

//! Newslight Tracker - Interaction tracking for the traffic-light news reader
//!
//! The tracker records what a reader does with articles and their
//! traffic-light indicators and reports it to a spreadsheet-backed webhook:
//! focus signal → interval tracking → event construction → best-effort
//! delivery with exponential backoff.
//!
//! ## Modules
//!
//! - **Tracker**: [`InteractionTracker`] owns the session, the catalog, the
//!   reading and hover intervals, and the emitter
//! - **Emitter**: fire-and-forget delivery with bounded retries
//! - **Catalog**: article metadata lookup and traffic-light classification

pub mod catalog;
pub mod config;
pub mod emitter;
pub mod error;
pub mod focus;
pub mod interval;
pub mod session;
pub mod tracker;
pub mod transport;
pub mod types;

pub use catalog::{Article, ArticleCatalog, SubjectMetadata, TrafficLight, TrafficLightThresholds};
pub use config::TrackerConfig;
pub use emitter::{DeliveryStatsSnapshot, Dispatch, Emitter, RetryPolicy, RetryScheduler};
pub use error::TrackError;
pub use focus::{FocusScript, FocusSignal, FocusSource};
pub use interval::IntervalTracker;
pub use session::{resolve_participant_id, Session};
pub use tracker::InteractionTracker;
pub use transport::{Transport, WebhookTransport};
pub use types::{DeliveryPayload, EventKind, TrackingEvent};

/// Tracker version
pub const TRACKER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "newslight-tracker";

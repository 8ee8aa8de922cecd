//! Error types for Newslight tracking

use thiserror::Error;

/// Errors that can occur while configuring or running the tracker
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Invalid delivery endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

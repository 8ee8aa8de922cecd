//! Session identity
//!
//! The participant identifier is read once from the reader's launch URL and
//! never changes afterwards. Anything unreadable is treated as an anonymous
//! session.

use reqwest::Url;
use uuid::Uuid;

/// Query parameter carrying the participant identifier
pub const DEFAULT_PARTICIPANT_PARAM: &str = "pid";

/// Base used to interpret bare query strings such as `?pid=abc`
const LAUNCH_BASE: &str = "launch://reader/";

/// Process-wide session identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    participant_id: Option<String>,
    instance_id: String,
}

impl Session {
    /// Resolve the session from launch parameters using the default `pid` key
    pub fn from_launch(launch: &str) -> Self {
        Self::from_launch_with_param(launch, DEFAULT_PARTICIPANT_PARAM)
    }

    /// Resolve the session from launch parameters using a custom key
    pub fn from_launch_with_param(launch: &str, param: &str) -> Self {
        Self::with_participant(resolve_participant_id(launch, param))
    }

    /// A session without a participant identifier
    pub fn anonymous() -> Self {
        Self::with_participant(None)
    }

    pub fn with_participant(participant_id: Option<String>) -> Self {
        Self {
            participant_id: participant_id.filter(|id| !id.is_empty()),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    /// Participant identifier as written on the wire (empty when anonymous)
    pub fn participant_label(&self) -> &str {
        self.participant_id.as_deref().unwrap_or("")
    }

    /// Per-process identifier used to correlate log lines
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// Read the participant identifier from a launch URL or query string.
///
/// Accepts a full URL (`https://host/?pid=abc`), a query string with or
/// without the leading `?`, or nothing at all. Returns the first non-empty
/// value of `param`, percent-decoded. Never fails: unreadable input yields
/// `None`.
pub fn resolve_participant_id(launch: &str, param: &str) -> Option<String> {
    let launch = launch.trim();
    if launch.is_empty() {
        return None;
    }

    let url = launch_url(launch)?;
    let value = url
        .query_pairs()
        .find(|(key, _)| key == param)
        .map(|(_, value)| value.trim().to_string())?;

    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn launch_url(launch: &str) -> Option<Url> {
    if let Ok(url) = Url::parse(launch) {
        if url.query().is_some() || url.has_host() {
            return Some(url);
        }
    }

    // Not an absolute URL: treat the input as the query component.
    let query = launch.split_once('?').map_or(launch, |(_, query)| query);
    let query = query.split('#').next().unwrap_or_default();
    let mut base = Url::parse(LAUNCH_BASE).ok()?;
    base.set_query(Some(query));
    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_from_full_url() {
        let pid = resolve_participant_id(
            "https://reader.example.com/index.html?pid=P042&lang=en",
            "pid",
        );
        assert_eq!(pid.as_deref(), Some("P042"));
    }

    #[test]
    fn test_resolves_from_query_string() {
        assert_eq!(resolve_participant_id("?pid=abc", "pid").as_deref(), Some("abc"));
        assert_eq!(resolve_participant_id("lang=en&pid=xyz", "pid").as_deref(), Some("xyz"));
        assert_eq!(
            resolve_participant_id("/index.html?pid=rel#top", "pid").as_deref(),
            Some("rel")
        );
    }

    #[test]
    fn test_percent_decoding_and_first_value_wins() {
        let pid = resolve_participant_id("?pid=group%201%2Fa&pid=second", "pid");
        assert_eq!(pid.as_deref(), Some("group 1/a"));
    }

    #[test]
    fn test_absent_or_empty_is_anonymous() {
        assert_eq!(resolve_participant_id("", "pid"), None);
        assert_eq!(resolve_participant_id("https://reader.example.com/", "pid"), None);
        assert_eq!(resolve_participant_id("?pid=", "pid"), None);
        assert_eq!(resolve_participant_id("?other=1", "pid"), None);
    }

    #[test]
    fn test_garbage_never_panics() {
        for input in ["%%%", "?=&=&", "::::", "?pid=%ZZ", "http://[::1"] {
            let _ = resolve_participant_id(input, "pid");
        }
        assert_eq!(resolve_participant_id("?pid=%ZZ", "pid").as_deref(), Some("%ZZ"));
    }

    #[test]
    fn test_custom_param() {
        let session = Session::from_launch_with_param("?participant=p9", "participant");
        assert_eq!(session.participant_id(), Some("p9"));
    }

    #[test]
    fn test_session_labels() {
        let session = Session::from_launch("?pid=P1");
        assert_eq!(session.participant_label(), "P1");

        let anon = Session::anonymous();
        assert_eq!(anon.participant_id(), None);
        assert_eq!(anon.participant_label(), "");
        assert!(!anon.instance_id().is_empty());
        assert_ne!(anon.instance_id(), session.instance_id());
    }
}

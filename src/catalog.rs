//! Article catalog lookup
//!
//! The catalog is supplied by the reader (usually the generated article
//! list) and is read-only here. The tracker only needs the traffic-light
//! status and misleading score of an article to annotate its events.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TrackError;

/// Traffic-light rating shown next to an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLight {
    Green,
    Yellow,
    Red,
}

impl TrafficLight {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficLight::Green => "green",
            TrafficLight::Yellow => "yellow",
            TrafficLight::Red => "red",
        }
    }
}

impl fmt::Display for TrafficLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score cut-offs for the traffic light.
///
/// `0..=green_max` is green, `green_max+1..=yellow_max` is yellow, anything
/// above is red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficLightThresholds {
    pub green_max: u32,
    pub yellow_max: u32,
}

impl Default for TrafficLightThresholds {
    fn default() -> Self {
        Self {
            green_max: 33,
            yellow_max: 66,
        }
    }
}

impl TrafficLightThresholds {
    pub fn new(green_max: u32, yellow_max: u32) -> Result<Self, TrackError> {
        if green_max > yellow_max {
            return Err(TrackError::Config(format!(
                "green_max ({green_max}) must not exceed yellow_max ({yellow_max})"
            )));
        }
        Ok(Self {
            green_max,
            yellow_max,
        })
    }

    /// Map a misleading score to its traffic light
    pub fn classify(&self, score: u32) -> TrafficLight {
        if score <= self.green_max {
            TrafficLight::Green
        } else if score <= self.yellow_max {
            TrafficLight::Yellow
        } else {
            TrafficLight::Red
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Identifier; numeric ids are accepted and kept in string form
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub traffic_light_status: Option<String>,
    #[serde(default)]
    pub misleading_score: Option<u32>,
}

/// Annotations attached to events about a subject
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubjectMetadata {
    /// Traffic-light status, empty when the article has none
    pub status_tag: String,
    pub numeric_score: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<Article>),
    Wrapped { articles: Vec<Article> },
}

/// Read-only collection of articles keyed by normalized identifier
#[derive(Debug, Clone, Default)]
pub struct ArticleCatalog {
    articles: Vec<Article>,
    index: HashMap<String, usize>,
    thresholds: TrafficLightThresholds,
}

impl ArticleCatalog {
    /// Build a catalog; on duplicate identifiers the first article wins
    pub fn new(articles: Vec<Article>) -> Self {
        Self::with_thresholds(articles, TrafficLightThresholds::default())
    }

    pub fn with_thresholds(articles: Vec<Article>, thresholds: TrafficLightThresholds) -> Self {
        let mut index = HashMap::with_capacity(articles.len());
        for (position, article) in articles.iter().enumerate() {
            index
                .entry(normalize_id(&article.id).to_string())
                .or_insert(position);
        }
        Self {
            articles,
            index,
            thresholds,
        }
    }

    /// Parse a catalog from either a JSON array or `{"articles": [...]}`
    pub fn from_json(json: &str) -> Result<Self, TrackError> {
        Self::from_json_with_thresholds(json, TrafficLightThresholds::default())
    }

    pub fn from_json_with_thresholds(
        json: &str,
        thresholds: TrafficLightThresholds,
    ) -> Result<Self, TrackError> {
        let document: CatalogDocument = serde_json::from_str(json)
            .map_err(|e| TrackError::ParseError(format!("Failed to parse article catalog: {e}")))?;
        let articles = match document {
            CatalogDocument::List(articles) => articles,
            CatalogDocument::Wrapped { articles } => articles,
        };
        Ok(Self::with_thresholds(articles, thresholds))
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn get(&self, subject_id: &str) -> Option<&Article> {
        self.index
            .get(normalize_id(subject_id))
            .and_then(|&position| self.articles.get(position))
    }

    /// Look up the event annotations for a subject.
    ///
    /// Returns `None` for a missing, blank or unknown identifier. An article
    /// with a score but no explicit status gets its status from the
    /// thresholds.
    pub fn lookup(&self, subject_id: Option<&str>) -> Option<SubjectMetadata> {
        let subject_id = subject_id.filter(|id| !normalize_id(id).is_empty())?;
        let article = self.get(subject_id)?;

        let explicit_status = article
            .traffic_light_status
            .as_deref()
            .map(str::trim)
            .filter(|status| !status.is_empty());

        let status_tag = match (explicit_status, article.misleading_score) {
            (Some(status), _) => status.to_string(),
            (None, Some(score)) => self.thresholds.classify(score).to_string(),
            (None, None) => String::new(),
        };

        Some(SubjectMetadata {
            status_tag,
            numeric_score: article.misleading_score,
        })
    }
}

fn normalize_id(id: &str) -> &str {
    id.trim()
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s.trim().to_string()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "article id must be a string or number, got {other}"
        ))),
    }
}

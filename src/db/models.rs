use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::archiver::ArchiveState;

/// A bookmarked URL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub url: String,
    pub notes: Option<String>,
    pub created_at: String,
}

/// For inserting new links.
#[derive(Debug, Clone, Default)]
pub struct NewLink {
    pub url: String,
    pub notes: Option<String>,
}

/// The archived copy of a link's page. One per link.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Archive {
    pub id: i64,
    pub link_id: i64,
    pub content_html: Option<String>,
    pub content_text: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// JSON object: page metadata for HTML, `{content_type, final_url}` otherwise.
    pub metadata: Option<String>,
    pub error_message: Option<String>,
    pub fetched_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Archive {
    /// Parse the stored metadata JSON. Missing or malformed data yields an empty map.
    #[must_use]
    pub fn metadata_map(&self) -> Map<String, Value> {
        parse_json_object(self.metadata.as_deref())
    }
}

/// One entry in an archive's append-only state history.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArchiveTransition {
    pub id: i64,
    pub archive_id: i64,
    pub to_state: String,
    pub metadata: String,
    pub sort_key: i64,
    pub most_recent: bool,
    pub created_at: String,
}

impl ArchiveTransition {
    #[must_use]
    pub fn state(&self) -> Option<ArchiveState> {
        ArchiveState::parse(&self.to_state)
    }

    #[must_use]
    pub fn metadata_map(&self) -> Map<String, Value> {
        parse_json_object(Some(&self.metadata))
    }

    /// The `error_reason` recorded on a failing transition.
    #[must_use]
    pub fn error_reason(&self) -> Option<String> {
        self.metadata_map()
            .get("error_reason")
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }
}

/// Content written to an archive together with its `completed` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveContent {
    pub content_html: Option<String>,
    pub content_text: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub metadata: Map<String, Value>,
    pub fetched_at: DateTime<Utc>,
}

/// Record changes that must land atomically with a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveUpdate {
    Content(ArchiveContent),
    Failure { error_message: String },
}

fn parse_json_object(raw: Option<&str>) -> Map<String, Value> {
    raw.and_then(|s| serde_json::from_str::<Value>(s).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

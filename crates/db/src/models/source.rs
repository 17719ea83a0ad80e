//! Script source entity model and DTOs.
//!
//! A source is one row in the `sources` table: a named script of a given
//! type (`module`, `controller`, `daemon`, `crontab`, `template` or
//! `resource`) together with its routing and scheduling metadata.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use plinth_core::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A script source as stored in the registry.
///
/// `Deserialize` is derived so exported registries can be re-imported via
/// the bulk endpoint; absent fields fall back to their zero values. The
/// row id is exposed as `rowid` in JSON, which is what import files carry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "rowid", default)]
    pub id: DbId,
    #[serde(default)]
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compiled: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub cron: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default = "chrono::Utc::now")]
    pub last_modified_date: Timestamp,
    /// Daemon liveness ("true"/"false"), stamped onto listing rows by the
    /// API layer. Never stored.
    #[sqlx(skip)]
    #[serde(default)]
    pub status: String,
}

/// DTO for updating an existing source. Only non-`None` fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSource {
    pub content: Option<String>,
    pub compiled: Option<String>,
    pub active: Option<bool>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub cron: Option<String>,
    pub tag: Option<String>,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Column set returned by a listing query.
///
/// The narrower sets blank out the heavyweight text columns instead of
/// dropping them, so every projection decodes into the same [`Source`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceProjection {
    /// Every column.
    #[default]
    Full,
    /// `compiled` blanked; used by the editor to fetch script text.
    Content,
    /// `content` and `compiled` blanked; used by list views.
    Basic,
}

/// Filter, ordering and paging for listing queries.
///
/// `name` and `kind` are SQL `LIKE` patterns. `tag` is a comma-separated
/// list of substrings matched disjunctively; empty means no tag filter.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    pub name: String,
    pub kind: String,
    pub tag: String,
    pub from: i64,
    pub size: i64,
    pub sort: Option<String>,
    pub projection: SourceProjection,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            name: "%".to_string(),
            kind: "%".to_string(),
            tag: String::new(),
            from: 0,
            size: 10,
            sort: None,
            projection: SourceProjection::Full,
        }
    }
}

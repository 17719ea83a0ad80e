//! Shared query parameter types for API handlers.

use serde::Deserialize;

use plinth_db::models::source::{SourceFilter, SourceProjection};

/// Query parameters for `GET /source` listings.
///
/// `name` and `type` accept `*` wildcards, translated to SQL `%`.
/// `basic`, `content` and `bulk` are presence flags; any value they
/// carry is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct SourceListParams {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub tag: Option<String>,
    pub from: Option<i64>,
    pub size: Option<i64>,
    pub sort: Option<String>,
    pub basic: Option<String>,
    pub content: Option<String>,
    pub bulk: Option<String>,
}

impl SourceListParams {
    /// Whether this is a bulk export request.
    pub fn is_bulk(&self) -> bool {
        self.bulk.is_some()
    }

    /// Translate the wire parameters into a repository filter.
    ///
    /// Bulk exports always carry the full column set so the download can
    /// be re-imported without loss.
    pub fn into_filter(self) -> SourceFilter {
        let mut filter = SourceFilter::default();
        let bulk = self.bulk.is_some();
        if let Some(name) = self.name.filter(|s| !s.is_empty()) {
            filter.name = name.replace('*', "%");
        }
        if let Some(kind) = self.kind.filter(|s| !s.is_empty()) {
            filter.kind = kind.replace('*', "%");
        }
        if let Some(tag) = self.tag {
            filter.tag = tag;
        }
        if let Some(from) = self.from {
            filter.from = from.max(0);
        }
        if let Some(size) = self.size.filter(|n| *n > 0) {
            filter.size = size;
        }
        filter.sort = self.sort.filter(|s| !s.is_empty());
        filter.projection = if bulk {
            SourceProjection::Full
        } else if self.basic.is_some() {
            SourceProjection::Basic
        } else if self.content.is_some() {
            SourceProjection::Content
        } else {
            SourceProjection::Full
        };
        filter
    }
}

/// Query parameters for `POST /source`; `?bulk` switches to bulk import.
#[derive(Debug, Default, Deserialize)]
pub struct SourceCreateParams {
    pub bulk: Option<String>,
}

/// Query parameters for `DELETE /source`.
#[derive(Debug, Deserialize)]
pub struct SourceDeleteParams {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

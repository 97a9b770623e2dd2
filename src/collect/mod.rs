//! Collection and enrichment engine.
//!
//! Collectors gather recent activity from upstream sources and emit canonical
//! [`Item`]s; the [`orchestrator`](crate::collect::CategoryOrchestrator) runs
//! them per category under bounded worker pools, deduplicates release
//! versions, and enforces a deterministic output ordering.

use chrono::{DateTime, Utc};
use compact_str::{CompactString, format_compact};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

pub mod advisories;
pub mod cache;
pub mod changelog;
pub mod client;
pub mod compare;
pub mod dedupe;
pub mod feeds;
pub mod issues;
pub mod orchestrator;
pub mod reference;
pub mod registry;
pub mod release;
pub mod resolver;
pub mod text;
pub mod throttler;

pub use cache::{CacheValue, RunCache};
pub use client::{GithubClient, RateLimitInfo};
pub use orchestrator::CategoryOrchestrator;
pub use resolver::ReferenceResolver;

/// The kind of source a collected item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Release,
    Issue,
    Advisory,
    Feed,
    Registry,
}

impl SourceKind {
    /// Stable label used in the sort key and in log lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Issue => "issue",
            Self::Advisory => "advisory",
            Self::Feed => "feed",
            Self::Registry => "registry",
        }
    }
}

/// A single digest entry, emitted by a collector and handed unchanged to the
/// summarization step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    pub source: SourceKind,
}

/// Short opaque identifier stamped at invocation, used for log correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(CompactString);

impl RunId {
    /// Stamp a new run id from the current instant.
    #[must_use]
    pub fn stamp() -> Self {
        #[expect(clippy::cast_sign_loss, reason = "timestamps after 1970 are non-negative")]
        let millis = Utc::now().timestamp_millis() as u64;
        Self(format_compact!("{:08x}", (millis ^ u64::from(std::process::id())) & 0xffff_ffff))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fetch a string field from a JSON object.
pub(crate) fn json_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Fetch an unsigned integer field from a JSON object, defaulting to zero.
pub(crate) fn json_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Fetch and parse an RFC 3339 timestamp field from a JSON object.
pub(crate) fn json_datetime(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    json_str(value, key).and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.to_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_labels_are_stable() {
        assert_eq!(SourceKind::Release.label(), "release");
        assert_eq!(SourceKind::Registry.label(), "registry");
        assert_eq!(SourceKind::Feed.to_string(), "feed");
    }

    #[test]
    fn run_id_is_short_hex() {
        let id = RunId::stamp();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn json_helpers_tolerate_missing_fields() {
        let value = json!({"title": "x", "count": 3, "at": "2026-02-15T08:00:00Z"});
        assert_eq!(json_str(&value, "title"), Some("x"));
        assert_eq!(json_str(&value, "missing"), None);
        assert_eq!(json_u64(&value, "count"), 3);
        assert_eq!(json_u64(&value, "missing"), 0);
        assert!(json_datetime(&value, "at").is_some());
        assert!(json_datetime(&value, "title").is_none());
    }

    #[test]
    fn item_round_trips_through_serde() {
        let item = Item {
            title: "demo v1.0.0 released".to_string(),
            url: "https://github.com/o/r/releases/tag/v1.0.0".to_string(),
            published_at: DateTime::parse_from_rfc3339("2026-02-15T08:00:00Z").unwrap().to_utc(),
            body: "notes".to_string(),
            source: SourceKind::Release,
        };
        let text = serde_json::to_string(&item).unwrap();
        let back: Item = serde_json::from_str(&text).unwrap();
        assert_eq!(back, item);
    }
}

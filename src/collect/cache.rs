//! Per-run memoization shared by collectors and enrichers.
//!
//! [`RunCache`] maps `(namespace, key)` to the first value computed for that
//! pair during the run, including negative results. Call paths that naturally
//! overlap (release deep-crawl, issue enrichment, feed enrichment) all go
//! through it, so a reference touched from several directions is fetched once.

use crate::Result;
use compact_str::CompactString;
use core::future::Future;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

const LOG_TARGET: &str = "     cache";

/// A memoized value. `Absent` is a first-class negative entry: a lookup that
/// previously resolved to "nothing there" is not retried within the run.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// A parsed JSON payload.
    Json(Arc<Value>),

    /// A derived text block (formatted compare summary, file excerpt, etc.).
    Text(Arc<str>),

    /// The upstream said there is no such thing.
    Absent,
}

impl CacheValue {
    #[must_use]
    pub fn json(value: Value) -> Self {
        Self::Json(Arc::new(value))
    }

    #[must_use]
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::Text(Arc::from(value.as_ref()))
    }

    /// Wrap an optional JSON payload, mapping `None` to [`CacheValue::Absent`].
    #[must_use]
    pub fn from_option(value: Option<Value>) -> Self {
        value.map_or(Self::Absent, Self::json)
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Arc<Value>> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Short description for hit logging; never dumps the value itself.
    fn summary(&self) -> String {
        match self {
            Self::Json(value) => match value.as_ref() {
                Value::Array(items) => format!("array of {}", items.len()),
                Value::Object(map) => {
                    let keys: Vec<&str> = map.keys().take(3).map(String::as_str).collect();
                    format!("object with {} keys [{}…]", map.len(), keys.join(", "))
                }
                Value::Null => "null".to_string(),
                other => format!("scalar {other}"),
            },
            Self::Text(value) => format!("text of {} chars", value.chars().count()),
            Self::Absent => "absent".to_string(),
        }
    }
}

type SlotKey = (CompactString, String);

/// Process-scoped, thread-safe memoization keyed by `(namespace, key)`.
///
/// The map lock is only held for slot lookup; the per-slot
/// [`OnceCell`] gives single-flight semantics, so `compute` runs at most once
/// per pair even under concurrent access from the worker pools. Errors are not
/// memoized; the next caller computes again.
#[derive(Debug, Default)]
pub struct RunCache {
    slots: Mutex<HashMap<SlotKey, Arc<OnceCell<CacheValue>>>>,
}

impl RunCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized value for `(namespace, key)`, computing it on first
    /// access. Negative results are memoized the same way as successes.
    pub async fn fetch<F, Fut>(&self, namespace: &str, key: &str, compute: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        let slot = {
            let mut slots = self.slots.lock().expect("lock not poisoned");
            Arc::clone(slots.entry((namespace.into(), key.to_string())).or_default())
        };

        if let Some(value) = slot.get() {
            log::debug!(target: LOG_TARGET, "Cache hit for {namespace}:{key} ({})", value.summary());
            return Ok(value.clone());
        }

        let value = slot
            .get_or_try_init(|| async move {
                log::debug!(target: LOG_TARGET, "Cache miss for {namespace}:{key}, computing");
                compute().await
            })
            .await?;

        Ok(value.clone())
    }

    /// Number of populated or in-flight slots; used for diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().expect("lock not poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

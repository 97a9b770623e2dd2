//! Release deduplication and the deterministic output ordering.
//!
//! A hosting-platform release and a registry entry for the same package
//! version produce near-identical titles; only the highest-priority one
//! survives. Afterwards a stable sort makes the emitted sequence a pure
//! function of the inputs regardless of per-repo scheduling jitter.

use crate::collect::{Item, SourceKind};
use regex::Regex;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Titles of the form `<name> v?<x.y.z[…]> released`.
static RELEASE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.+?) [vV]?(?P<version>\d+\.\d+\.\d+\S*) released$").expect("invalid regex"));

/// Dedupe key derived from a release-shaped title: `(package, version)`,
/// package lowercased, plus the fixed `"release"` marker.
#[must_use]
pub fn release_key(title: &str) -> Option<(String, String, &'static str)> {
    let caps = RELEASE_TITLE.captures(title)?;
    Some((caps["name"].to_lowercase(), caps["version"].to_string(), "release"))
}

/// Priority rank: hosting-platform releases beat registry entries, which
/// beat anything else.
const fn source_rank(source: SourceKind) -> u8 {
    match source {
        SourceKind::Release => 2,
        SourceKind::Registry => 1,
        _ => 0,
    }
}

/// Within each `(package, version)` bucket keep the item maximizing
/// `(source-rank, body-length, published-at)`; ungrouped items pass through.
#[must_use]
pub fn deduplicate_release_versions(items: Vec<Item>) -> Vec<Item> {
    let mut winners: HashMap<(String, String, &'static str), usize> = HashMap::new();

    for (index, item) in items.iter().enumerate() {
        let Some(key) = release_key(&item.title) else { continue };
        match winners.entry(key) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                let _ = slot.insert(index);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let current = &items[*slot.get()];
                let challenger_priority = (source_rank(item.source), item.body.len(), item.published_at);
                let current_priority = (source_rank(current.source), current.body.len(), current.published_at);
                if challenger_priority > current_priority {
                    let _ = slot.insert(index);
                }
            }
        }
    }

    items
        .into_iter()
        .enumerate()
        .filter(|(index, item)| release_key(&item.title).is_none_or(|key| winners.get(&key) == Some(index)))
        .map(|(_, item)| item)
        .collect()
}

/// The deterministic output ordering:
/// `(-published_at, title, source_label, url)`.
pub fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| {
        (Reverse(a.published_at), &a.title, a.source.label(), &a.url).cmp(&(Reverse(b.published_at), &b.title, b.source.label(), &b.url))
    });
}

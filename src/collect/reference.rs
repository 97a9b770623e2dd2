//! Extraction of issue/PR numbers referenced from free text.
//!
//! Combines URL references, context-keyword references (`fixes #12`),
//! bracketed changelog references (`[#12]`, `[PR #12]`), and `GH-12` tokens,
//! then subtracts anything that appears in a non-platform tracker context
//! (`ticket #999`, `jira #4711`, …).

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Reference numbers are constrained to 1–7 digits.
const NUMBER: &str = r"([0-9]{1,7})";

/// Context keyword followed by `#N` within a tolerance window of up to 50
/// non-`#`, non-newline characters.
static KEYWORD_REF: LazyLock<Regex> = LazyLock::new(|| {
    let keywords = r"pr|pull(?:[ \t]+request)?|issue|fix(?:es|ed)?|close[sd]?|resolve[sd]?|ref(?:er(?:ence[sd]?|red)?)?";
    Regex::new(&format!(r"(?i)\b(?:{keywords})\b[^#\n]{{0,50}}#{NUMBER}\b")).expect("invalid regex")
});

/// Bracketed changelog references: `[#N]` and `[PR #N]` (not `[Issue #N]`).
static BRACKET_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(&format!(r"(?i)\[(?:PR[ \t]+)?#{NUMBER}\]")).expect("invalid regex"));

static GH_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(&format!(r"(?i)\bGH-{NUMBER}\b")).expect("invalid regex"));

/// Identifiers owned by non-platform trackers; numbers matched here are
/// removed from the result set.
static TRACKER_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b(?:ticket|jira|trac|redmine)\b[ \t:]{{0,5}}#{NUMBER}\b")).expect("invalid regex"));

/// Extract the ordered, unique list of issue/PR numbers referenced from
/// `text` within the `owner/repo` context. When `limit` is given, only the
/// first `limit` numbers (in original text order) are returned.
#[must_use]
pub fn extract_references(text: &str, owner: &str, repo: &str, limit: Option<usize>) -> Vec<u64> {
    if text.is_empty() {
        return Vec::new();
    }

    let url_ref = Regex::new(&format!(
        r"https?://[^\s/]+/{}/{}/(?:issues|pull)/{NUMBER}\b",
        regex::escape(owner),
        regex::escape(repo)
    ))
    .expect("invalid regex");

    let blocked: HashSet<u64> = TRACKER_REF
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect();

    let mut matches: Vec<(usize, u64)> = Vec::new();
    for pattern in [&url_ref, &KEYWORD_REF, &BRACKET_REF, &GH_REF] {
        for cap in pattern.captures_iter(text) {
            let Some(number) = cap.get(1) else { continue };
            let Ok(parsed) = number.as_str().parse::<u64>() else { continue };
            if parsed == 0 || blocked.contains(&parsed) {
                continue;
            }
            matches.push((cap.get(0).map_or(0, |m| m.start()), parsed));
        }
    }

    matches.sort_by_key(|&(position, _)| position);

    let mut seen = HashSet::new();
    let mut references: Vec<u64> = matches.into_iter().filter(|&(_, n)| seen.insert(n)).map(|(_, n)| n).collect();

    if let Some(limit) = limit {
        references.truncate(limit);
    }

    references
}

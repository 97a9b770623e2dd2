//! Changelog-file excerpt extraction for release context.
//!
//! Fetches a repo text file through the contents endpoint (base64 payload),
//! locates the heading for the released tag, and captures through the next
//! version-like heading.

use crate::Result;
use crate::collect::cache::{CacheValue, RunCache};
use crate::collect::client::GithubClient;
use crate::collect::json_str;
use crate::collect::text::truncate_with_ellipsis;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use std::sync::{Arc, LazyLock};

const LOG_TARGET: &str = " changelog";

/// Likely changelog paths checked when a repo doesn't configure its own.
pub const DEFAULT_CHANGELOG_FILES: &[&str] = &["CHANGELOG.md", "CHANGES.md", "Changes.md", "HISTORY.md", "RELEASE_NOTES.md"];

/// A changelog section excerpt is capped at this many characters.
const SECTION_CAP: usize = 2_500;

/// A heading is "version-like" (and thus terminates a section) when it
/// contains a dotted version number.
static VERSION_SHAPED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.\d+(?:\.\d+)?").expect("invalid regex"));

static SETEXT_UNDERLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:=|-){2,}\s*$").expect("invalid regex"));

/// Fetch the first configured changelog file that contains a section for
/// `tag`, returning the capped excerpt.
pub async fn fetch_changelog_excerpt(
    client: &GithubClient,
    cache: &RunCache,
    owner: &str,
    repo: &str,
    paths: &[&str],
    tag: &str,
) -> Result<Option<String>> {
    for path in paths {
        let Some(content) = file_content(client, cache, owner, repo, path).await? else {
            continue;
        };
        if let Some(section) = extract_version_section(&content, tag) {
            log::debug!(target: LOG_TARGET, "Found section for '{tag}' in {owner}/{repo}:{path}");
            return Ok(Some(truncate_with_ellipsis(&section, SECTION_CAP)));
        }
    }
    Ok(None)
}

/// Decoded content of a repo text file, memoized (with negatives) per run.
async fn file_content(client: &GithubClient, cache: &RunCache, owner: &str, repo: &str, path: &str) -> Result<Option<Arc<str>>> {
    let key = format!("{owner}/{repo}:{path}");
    let value = cache
        .fetch("file", &key, || async move {
            let api_path = format!("/repos/{owner}/{repo}/contents/{path}");
            match client.get_json(&api_path, &[]).await? {
                None => Ok(CacheValue::Absent),
                Some(payload) => match decode_contents_payload(&payload) {
                    Some(text) => Ok(CacheValue::text(text)),
                    None => {
                        log::warn!(target: LOG_TARGET, "Could not decode contents payload for {owner}/{repo}:{path}");
                        Ok(CacheValue::Absent)
                    }
                },
            }
        })
        .await?;

    match value {
        CacheValue::Text(text) => Ok(Some(text)),
        _ => Ok(None),
    }
}

/// Decode the base64 `content` field of a contents-endpoint payload. The
/// encoded text arrives with embedded newlines.
fn decode_contents_payload(payload: &serde_json::Value) -> Option<String> {
    let encoded = json_str(payload, "content")?;
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).ok()?;
    String::from_utf8(bytes).ok()
}

/// Locate the heading for `tag` (tolerating a leading `v` either way) and
/// capture through the next version-like heading.
#[must_use]
pub fn extract_version_section(text: &str, tag: &str) -> Option<String> {
    let bare = tag.trim_start_matches(['v', 'V']);
    let mut variants: Vec<String> = vec![tag.to_string(), bare.to_string(), format!("v{bare}")];
    variants.dedup();

    let lines: Vec<&str> = text.lines().collect();
    let start = (0..lines.len())
        .position(|index| heading_text(&lines, index).is_some_and(|heading| variants.iter().any(|v| contains_token(heading, v))))?;

    let mut end = lines.len();
    let mut index = start + 1;
    // Skip the setext underline belonging to the starting heading.
    if index < lines.len() && SETEXT_UNDERLINE.is_match(lines[index]) {
        index += 1;
    }
    while index < lines.len() {
        if let Some(heading) = heading_text(&lines, index) {
            if VERSION_SHAPED.is_match(heading) {
                end = index;
                break;
            }
        }
        index += 1;
    }

    Some(lines[start..end].join("\n").trim_end().to_string())
}

/// The text of a heading starting at `index`: an ATX heading of level ≤ 6,
/// or a line underlined in setext style.
fn heading_text<'a>(lines: &[&'a str], index: usize) -> Option<&'a str> {
    let line = lines[index];

    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) {
        let rest = &trimmed[hashes..];
        if rest.is_empty() || rest.starts_with(' ') {
            return Some(rest.trim());
        }
    }

    if !line.trim().is_empty() && lines.get(index + 1).is_some_and(|next| SETEXT_UNDERLINE.is_match(next)) {
        return Some(line.trim());
    }

    None
}

/// Whether `text` contains `token` bounded by non-version characters, so
/// `1.2.0` doesn't match inside `1.2.0-rc.1` or `11.2.0`.
fn contains_token(text: &str, token: &str) -> bool {
    let boundary = |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-';

    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(token) {
        let start = search_from + offset;
        let end = start + token.len();
        let ok_before = start == 0 || !text[..start].ends_with(boundary);
        let ok_after = end == text.len() || !text[end..].starts_with(boundary);
        if ok_before && ok_after {
            return true;
        }
        search_from = start + 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CHANGELOG: &str = "\
# Changelog

## v1.2.0 - 2026-02-15

### Fixed
- scheduler starvation [#42]

## v1.1.0 - 2026-02-01

- initial tuning
";

    #[test]
    fn extracts_the_tagged_section() {
        let section = extract_version_section(CHANGELOG, "v1.2.0").unwrap();
        assert!(section.starts_with("## v1.2.0 - 2026-02-15"));
        assert!(section.contains("scheduler starvation"));
        assert!(!section.contains("v1.1.0"));
    }

    #[test]
    fn tag_without_v_matches_v_heading() {
        let section = extract_version_section(CHANGELOG, "1.2.0").unwrap();
        assert!(section.contains("scheduler starvation"));
    }

    #[test]
    fn v_tag_matches_bare_heading() {
        let text = "## 2.0.0\n- rewrite\n\n## 1.9.9\n- legacy\n";
        let section = extract_version_section(text, "v2.0.0").unwrap();
        assert!(section.contains("rewrite"));
        assert!(!section.contains("legacy"));
    }

    #[test]
    fn setext_headings_are_recognized() {
        let text = "\
1.5.0
=====
- setext release notes

1.4.0
-----
- older
";
        let section = extract_version_section(text, "1.5.0").unwrap();
        assert!(section.contains("setext release notes"));
        assert!(!section.contains("older"));
    }

    #[test]
    fn version_token_does_not_match_inside_longer_versions() {
        let text = "## 11.2.0\n- not it\n\n## 1.2.0\n- the one\n";
        let section = extract_version_section(text, "1.2.0").unwrap();
        assert!(section.contains("the one"));
    }

    #[test]
    fn prerelease_heading_terminates_the_section() {
        // Any version-shaped heading terminates, including adjacent
        // pre-release chains.
        let text = "## 1.2.0-rc.2\n- later rc\n\n## 1.2.0-rc.1\n- earlier rc\n";
        let section = extract_version_section(text, "1.2.0-rc.2").unwrap();
        assert!(section.contains("later rc"));
        assert!(!section.contains("earlier rc"));
    }

    #[test]
    fn missing_tag_yields_none() {
        assert!(extract_version_section(CHANGELOG, "v9.9.9").is_none());
    }

    #[test]
    fn last_section_runs_to_end_of_file() {
        let section = extract_version_section(CHANGELOG, "v1.1.0").unwrap();
        assert!(section.contains("initial tuning"));
    }

    #[test]
    fn non_version_headings_do_not_terminate() {
        let text = "## v3.0.0\n\n### Breaking\n- a\n\n### Added\n- b\n\n## v2.9.0\n- old\n";
        let section = extract_version_section(text, "v3.0.0").unwrap();
        assert!(section.contains("### Added"));
        assert!(!section.contains("old"));
    }

    #[test]
    fn decodes_base64_contents_with_newlines() {
        let encoded = "IyBDaGFuZ2Vsb2cK\nIyMgdjEuMC4wCg==\n";
        let payload = json!({"content": encoded, "encoding": "base64"});
        let text = decode_contents_payload(&payload).unwrap();
        assert_eq!(text, "# Changelog\n## v1.0.0\n");
    }

    #[test]
    fn garbage_contents_payload_is_none() {
        assert!(decode_contents_payload(&json!({"content": "!!!not-base64!!!"})).is_none());
        assert!(decode_contents_payload(&json!({})).is_none());
    }
}

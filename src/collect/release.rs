//! Release collection: selects exactly one item per repo, the most recent
//! release (or tag) within the cutoff ranked by semantic version, and
//! assembles its enriched context.

use crate::Result;
use crate::collect::cache::CacheValue;
use crate::collect::changelog::{DEFAULT_CHANGELOG_FILES, fetch_changelog_excerpt};
use crate::collect::client::GITHUB_WEB_BASE;
use crate::collect::resolver::ReferenceResolver;
use crate::collect::text::truncate_with_ellipsis;
use crate::collect::throttler::Throttler;
use crate::collect::{Item, SourceKind, json_datetime, json_str};
use crate::config::{ReleaseStrategy, RepoRef};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use semver::Version;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

const LOG_TARGET: &str = "   release";

const RELEASES_WITH_TOKEN: usize = 30;
const RELEASES_WITHOUT_TOKEN: usize = 10;

/// Tag-list fallback is capped regardless of token presence.
const MAX_TAGS: usize = 20;

/// Final cap on an assembled release body.
const RELEASE_BODY_CAP: usize = 6_000;

/// One release or tag considered for selection.
#[derive(Debug, Clone)]
pub struct ReleaseCandidate {
    pub tag: String,
    pub body: String,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub version: Option<Version>,
}

impl ReleaseCandidate {
    fn from_release(payload: &Value) -> Option<Self> {
        let tag = json_str(payload, "tag_name")?.to_string();
        let published_at = json_datetime(payload, "published_at").or_else(|| json_datetime(payload, "created_at"))?;
        Some(Self {
            version: version_sort_key(&tag),
            body: json_str(payload, "body").unwrap_or("").to_string(),
            url: json_str(payload, "html_url").map(str::to_string),
            tag,
            published_at,
        })
    }
}

/// Parse a tag into its semantic-version sort key. A leading `v` is
/// tolerated; anything unparseable returns `None` and sorts last.
#[must_use]
pub fn version_sort_key(tag: &str) -> Option<Version> {
    Version::parse(tag.trim().trim_start_matches(['v', 'V'])).ok()
}

/// Descending candidate order: version first (invalid versions last), then
/// publication time.
fn compare_candidates(a: &ReleaseCandidate, b: &ReleaseCandidate) -> Ordering {
    match (&a.version, &b.version) {
        (Some(left), Some(right)) => left.cmp(right).then_with(|| a.published_at.cmp(&b.published_at)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.published_at.cmp(&b.published_at),
    }
}

/// Pick `(current, previous)`: `current` is the highest-ranked candidate
/// published within the cutoff; `previous` is the adjacent lower entry in the
/// full candidate ordering (it may itself be older than the cutoff).
#[must_use]
pub fn select_latest_release_pair(candidates: &[ReleaseCandidate], cutoff: DateTime<Utc>) -> Option<(usize, Option<usize>)> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| compare_candidates(&candidates[b], &candidates[a]));

    let position = order.iter().position(|&index| candidates[index].published_at >= cutoff)?;
    let current = order[position];
    let previous = order.get(position + 1).copied();
    Some((current, previous))
}

/// Collects release items for the configured repos of one category.
#[derive(Debug, Clone)]
pub struct ReleaseCollector {
    resolver: ReferenceResolver,
    repos: Vec<RepoRef>,
    cutoff: DateTime<Utc>,
    repo_threads: usize,
}

impl ReleaseCollector {
    #[must_use]
    pub fn new(resolver: ReferenceResolver, repos: Vec<RepoRef>, cutoff: DateTime<Utc>, repo_threads: usize) -> Self {
        Self {
            resolver,
            repos,
            cutoff,
            repo_threads,
        }
    }

    /// Collect at most one item per repo. Per-repo failures are logged and
    /// skipped; sibling repos continue.
    pub async fn collect(&self) -> Result<Vec<Item>> {
        let throttler = Throttler::new(self.repo_threads);

        let results = join_all(self.repos.iter().map(|repo| {
            let throttler = Arc::clone(&throttler);
            async move {
                let _permit = throttler.acquire().await;
                match self.collect_repo(repo).await {
                    Ok(item) => item,
                    Err(e) => {
                        log::warn!(target: LOG_TARGET, "Could not collect releases for '{}': {e}", repo.slug());
                        None
                    }
                }
            }
        }))
        .await;

        Ok(results.into_iter().flatten().collect())
    }

    async fn collect_repo(&self, repo: &RepoRef) -> Result<Option<Item>> {
        let candidates = self.gather_candidates(repo).await?;
        let Some((current_index, previous_index)) = select_latest_release_pair(&candidates, self.cutoff) else {
            log::debug!(target: LOG_TARGET, "No recent release or tag for '{}'", repo.slug());
            return Ok(None);
        };

        let current = &candidates[current_index];
        let previous = previous_index.map(|index| &candidates[index]);
        log::info!(
            target: LOG_TARGET,
            "Selected '{}' {} (previous: {})",
            repo.slug(),
            current.tag,
            previous.map_or("none", |p| p.tag.as_str())
        );

        let body = self.build_release_context(repo, current, previous).await?;
        let url = current
            .url
            .clone()
            .unwrap_or_else(|| format!("{GITHUB_WEB_BASE}/{}/{}/tree/{}", repo.owner, repo.name, current.tag));

        Ok(Some(Item {
            title: format!("{} {} released", repo.display(), current.tag),
            url,
            published_at: current.published_at,
            body,
            source: SourceKind::Release,
        }))
    }

    /// Candidate set per the configured strategy: releases, tags, or releases
    /// with a tag fallback when empty.
    async fn gather_candidates(&self, repo: &RepoRef) -> Result<Vec<ReleaseCandidate>> {
        let mut candidates = Vec::new();

        if repo.release_strategy != ReleaseStrategy::TagsOnly {
            candidates = self.fetch_releases(repo).await?;
        }

        if repo.release_strategy == ReleaseStrategy::TagsOnly
            || (repo.release_strategy == ReleaseStrategy::Auto && candidates.is_empty())
        {
            candidates = self.fetch_tag_candidates(repo).await?;
        }

        Ok(candidates)
    }

    async fn fetch_releases(&self, repo: &RepoRef) -> Result<Vec<ReleaseCandidate>> {
        let client = self.resolver.client();
        let per_page = if client.token_present() { RELEASES_WITH_TOKEN } else { RELEASES_WITHOUT_TOKEN };

        let value = self
            .resolver
            .cache()
            .fetch("releases", &repo.slug(), || async move {
                let path = format!("/repos/{}/{}/releases", repo.owner, repo.name);
                let rows = client.get_capped(&path, &[], per_page).await?;
                Ok(CacheValue::json(Value::Array(rows)))
            })
            .await?;

        let rows = value.as_json().and_then(|v| v.as_array().cloned()).unwrap_or_default();
        Ok(rows
            .iter()
            .filter(|row| !row.get("draft").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(ReleaseCandidate::from_release)
            .collect())
    }

    /// Tag fallback: list tags (capped), then look up each tag's commit time
    /// through the cached commit endpoint.
    async fn fetch_tag_candidates(&self, repo: &RepoRef) -> Result<Vec<ReleaseCandidate>> {
        let client = self.resolver.client();

        let value = self
            .resolver
            .cache()
            .fetch("tags", &repo.slug(), || async move {
                let path = format!("/repos/{}/{}/tags", repo.owner, repo.name);
                let rows = client.get_capped(&path, &[], MAX_TAGS).await?;
                Ok(CacheValue::json(Value::Array(rows)))
            })
            .await?;

        let rows = value.as_json().and_then(|v| v.as_array().cloned()).unwrap_or_default();

        let mut candidates = Vec::with_capacity(rows.len().min(MAX_TAGS));
        for row in rows.iter().take(MAX_TAGS) {
            let Some(tag) = json_str(row, "name") else { continue };
            let Some(sha) = row.get("commit").and_then(|c| c.get("sha")).and_then(Value::as_str) else {
                continue;
            };
            let Some(committed_at) = self.fetch_commit_time(repo, sha).await? else {
                continue;
            };

            candidates.push(ReleaseCandidate {
                tag: tag.to_string(),
                body: String::new(),
                url: None,
                published_at: committed_at,
                version: version_sort_key(tag),
            });
        }

        Ok(candidates)
    }

    async fn fetch_commit_time(&self, repo: &RepoRef, sha: &str) -> Result<Option<DateTime<Utc>>> {
        let key = format!("{}@{sha}", repo.slug());
        let value = self
            .resolver
            .cache()
            .fetch("tag_commit", &key, || async move {
                let path = format!("/repos/{}/{}/commits/{sha}", repo.owner, repo.name);
                Ok(CacheValue::from_option(self.resolver.client().get_json(&path, &[]).await?))
            })
            .await?;

        let Some(payload) = value.as_json() else { return Ok(None) };
        let committed = payload
            .get("commit")
            .and_then(|c| c.get("committer").or_else(|| c.get("author")))
            .and_then(|p| p.get("date"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.to_utc());
        Ok(committed)
    }

    /// Body assembly: release notes, compare summary, deep-crawled linked
    /// references, and a changelog excerpt, capped to the body limit.
    async fn build_release_context(
        &self,
        repo: &RepoRef,
        current: &ReleaseCandidate,
        previous: Option<&ReleaseCandidate>,
    ) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();

        let own_body = current.body.trim();
        if !own_body.is_empty() {
            parts.push(own_body.to_string());
        }

        if let Some(previous) = previous {
            if let Some(summary) = self
                .resolver
                .compare_summary(&repo.owner, &repo.name, &previous.tag, &current.tag)
                .await?
            {
                parts.push(summary);
            }
        }

        let combined = parts.join("\n\n");
        if let Some(section) = self.resolver.linked_reference_section(&repo.owner, &repo.name, &combined).await? {
            parts.push(section);
        }

        let configured: Vec<&str> = repo.release_notes_files.iter().map(compact_str::CompactString::as_str).collect();
        let paths: &[&str] = if configured.is_empty() { DEFAULT_CHANGELOG_FILES } else { &configured };
        if let Some(excerpt) = fetch_changelog_excerpt(
            self.resolver.client(),
            self.resolver.cache(),
            &repo.owner,
            &repo.name,
            paths,
            &current.tag,
        )
        .await?
        {
            parts.push(excerpt);
        }

        Ok(truncate_with_ellipsis(&parts.join("\n\n"), RELEASE_BODY_CAP))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(tag: &str, published: &str) -> ReleaseCandidate {
        ReleaseCandidate {
            tag: tag.to_string(),
            body: String::new(),
            url: None,
            published_at: DateTime::parse_from_rfc3339(published).unwrap().to_utc(),
            version: version_sort_key(tag),
        }
    }

    fn instant(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().to_utc()
    }

    #[test]
    fn version_sort_key_tolerates_leading_v() {
        assert_eq!(version_sort_key("v1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(version_sort_key("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(version_sort_key("V2.0.0"), Some(Version::new(2, 0, 0)));
    }

    #[test]
    fn invalid_tags_have_no_sort_key() {
        assert_eq!(version_sort_key("nightly-2026-02-15"), None);
        assert_eq!(version_sort_key("v1.2"), None);
    }

    #[test]
    fn pair_selection_prefers_highest_semver() {
        let candidates = vec![
            candidate("v1.1.0", "2026-02-01T00:00:00Z"),
            candidate("v1.2.0", "2026-02-15T00:00:00Z"),
        ];
        let (current, previous) = select_latest_release_pair(&candidates, instant("2026-01-20T00:00:00Z")).unwrap();
        assert_eq!(candidates[current].tag, "v1.2.0");
        assert_eq!(candidates[previous.unwrap()].tag, "v1.1.0");
    }

    #[test]
    fn semver_outranks_recency() {
        // A backported 1.0.9 published after 1.1.0 must not win.
        let candidates = vec![
            candidate("v1.0.9", "2026-02-16T00:00:00Z"),
            candidate("v1.1.0", "2026-02-10T00:00:00Z"),
        ];
        let (current, previous) = select_latest_release_pair(&candidates, instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(candidates[current].tag, "v1.1.0");
        assert_eq!(candidates[previous.unwrap()].tag, "v1.0.9");
    }

    #[test]
    fn previous_may_predate_the_cutoff() {
        // Only the newest entry is inside the window, but the
        // adjacent lower candidate is still reported as previous.
        let candidates = vec![
            candidate("v2.1.0", "2026-02-10T00:00:00Z"),
            candidate("v2.0.0", "2026-01-20T00:00:00Z"),
        ];
        let (current, previous) = select_latest_release_pair(&candidates, instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(candidates[current].tag, "v2.1.0");
        assert_eq!(candidates[previous.unwrap()].tag, "v2.0.0");
    }

    #[test]
    fn no_candidate_within_cutoff_yields_none() {
        let candidates = vec![candidate("v1.0.0", "2026-01-01T00:00:00Z")];
        assert!(select_latest_release_pair(&candidates, instant("2026-02-01T00:00:00Z")).is_none());
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert!(select_latest_release_pair(&[], instant("2026-02-01T00:00:00Z")).is_none());
    }

    #[test]
    fn single_candidate_has_no_previous() {
        let candidates = vec![candidate("v1.0.0", "2026-02-10T00:00:00Z")];
        let (current, previous) = select_latest_release_pair(&candidates, instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(candidates[current].tag, "v1.0.0");
        assert!(previous.is_none());
    }

    #[test]
    fn invalid_versions_sort_last() {
        let candidates = vec![
            candidate("nightly", "2026-02-16T00:00:00Z"),
            candidate("v0.9.0", "2026-02-10T00:00:00Z"),
        ];
        let (current, previous) = select_latest_release_pair(&candidates, instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(candidates[current].tag, "v0.9.0");
        assert_eq!(candidates[previous.unwrap()].tag, "nightly");
    }

    #[test]
    fn version_tie_breaks_on_publication_time() {
        let candidates = vec![
            candidate("v1.0.0", "2026-02-10T00:00:00Z"),
            candidate("1.0.0", "2026-02-12T00:00:00Z"),
        ];
        let (current, _) = select_latest_release_pair(&candidates, instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(candidates[current].tag, "1.0.0");
    }

    #[test]
    fn prerelease_ranks_below_the_release() {
        let candidates = vec![
            candidate("v1.2.0-rc.1", "2026-02-16T00:00:00Z"),
            candidate("v1.2.0", "2026-02-10T00:00:00Z"),
        ];
        let (current, previous) = select_latest_release_pair(&candidates, instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(candidates[current].tag, "v1.2.0");
        assert_eq!(candidates[previous.unwrap()].tag, "v1.2.0-rc.1");
    }

    #[test]
    fn release_candidate_from_api_payload() {
        let payload = serde_json::json!({
            "tag_name": "v1.2.0",
            "body": "notes",
            "html_url": "https://github.com/octo/demo/releases/tag/v1.2.0",
            "published_at": "2026-02-15T08:00:00Z",
            "draft": false
        });
        let candidate = ReleaseCandidate::from_release(&payload).unwrap();
        assert_eq!(candidate.tag, "v1.2.0");
        assert_eq!(candidate.version, Some(Version::new(1, 2, 0)));
        assert_eq!(candidate.body, "notes");
    }

    #[test]
    fn release_without_timestamps_is_skipped() {
        let payload = serde_json::json!({"tag_name": "v1.0.0"});
        assert!(ReleaseCandidate::from_release(&payload).is_none());
    }
}

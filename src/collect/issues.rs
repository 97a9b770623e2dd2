//! Issue/PR collection: recently-updated items kept when notable, enriched
//! with their discussion and PR context.

use crate::Result;
use crate::collect::resolver::{ItemContext, ReferenceResolver, comment_login, engagement_score};
use crate::collect::text::{one_line, truncate_with_ellipsis};
use crate::collect::throttler::Throttler;
use crate::collect::{Item, SourceKind, json_datetime, json_str, json_u64};
use crate::config::RepoRef;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "    issues";

/// Engagement (comments + reactions) at or above this makes an item notable.
const ENGAGEMENT_THRESHOLD: u64 = 3;

/// Label substrings that make an item notable regardless of engagement.
const NOTABLE_LABELS: &[&str] = &["security", "breaking-change", "bug", "critical", "important", "release", "announcement"];

/// Single issue page requested when running without a token.
const UNTOKENED_ISSUE_PAGE: usize = 30;

const COMMENT_PREVIEW_CHARS: usize = 300;

/// Final cap on an assembled issue body.
const ISSUE_BODY_CAP: usize = 4_000;

/// Whether an issue/PR payload is worth putting in the digest.
#[must_use]
pub fn is_notable(meta: &Value) -> bool {
    if engagement_score(meta) >= ENGAGEMENT_THRESHOLD {
        return true;
    }

    meta.get("labels")
        .and_then(Value::as_array)
        .is_some_and(|labels| {
            labels.iter().any(|label| {
                json_str(label, "name")
                    .map(str::to_lowercase)
                    .is_some_and(|name| NOTABLE_LABELS.iter().any(|notable| name.contains(notable)))
            })
        })
}

/// Collects notable issues/PRs for the configured repos of one category.
#[derive(Debug, Clone)]
pub struct IssueCollector {
    resolver: ReferenceResolver,
    repos: Vec<RepoRef>,
    cutoff: DateTime<Utc>,
    repo_threads: usize,
}

impl IssueCollector {
    #[must_use]
    pub fn new(resolver: ReferenceResolver, repos: Vec<RepoRef>, cutoff: DateTime<Utc>, repo_threads: usize) -> Self {
        Self {
            resolver,
            repos,
            cutoff,
            repo_threads,
        }
    }

    pub async fn collect(&self) -> Result<Vec<Item>> {
        let throttler = Throttler::new(self.repo_threads);

        let results = join_all(self.repos.iter().map(|repo| {
            let throttler = Arc::clone(&throttler);
            async move {
                let _permit = throttler.acquire().await;
                match self.collect_repo(repo).await {
                    Ok(items) => items,
                    Err(e) => {
                        log::warn!(target: LOG_TARGET, "Could not collect issues for '{}': {e}", repo.slug());
                        Vec::new()
                    }
                }
            }
        }))
        .await;

        Ok(results.into_iter().flatten().collect())
    }

    async fn collect_repo(&self, repo: &RepoRef) -> Result<Vec<Item>> {
        let client = self.resolver.client();
        let path = format!("/repos/{}/{}/issues", repo.owner, repo.name);
        let query: Vec<(&str, String)> = vec![
            ("state", "all".to_string()),
            ("since", self.cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
        ];

        let rows = if client.token_present() {
            client.get_paginated(&path, &query).await?
        } else {
            client.get_capped(&path, &query, UNTOKENED_ISSUE_PAGE).await?
        };

        let mut items = Vec::new();
        for meta in &rows {
            let Some(updated_at) = json_datetime(meta, "updated_at") else { continue };
            if updated_at < self.cutoff || !is_notable(meta) {
                continue;
            }

            let Some(number) = meta.get("number").and_then(Value::as_u64) else { continue };
            let Some(url) = json_str(meta, "html_url") else { continue };
            let is_pull = meta.get("pull_request").is_some();
            let kind = if is_pull { "PR" } else { "Issue" };

            let body = build_issue_body(&self.resolver, &repo.owner, &repo.name, meta).await?;

            items.push(Item {
                title: format!("[{kind}] {}", json_str(meta, "title").unwrap_or("")),
                url: url.to_string(),
                published_at: updated_at,
                body,
                source: SourceKind::Issue,
            });
        }

        log::info!(target: LOG_TARGET, "Kept {} notable item(s) of {} updated in '{}'", items.len(), rows.len(), repo.slug());
        Ok(items)
    }
}

/// Assemble the enriched body for an issue/PR payload: header line,
/// description, full comment sequence, and the PR-context block. Shared with
/// the feed enricher.
pub(crate) async fn build_issue_body(resolver: &ReferenceResolver, owner: &str, repo: &str, meta: &Value) -> Result<String> {
    let number = meta.get("number").and_then(Value::as_u64).unwrap_or(0);
    let comment_count = json_u64(meta, "comments");
    let reactions = meta.get("reactions").map_or(0, |r| json_u64(r, "total_count"));
    let updated = json_datetime(meta, "updated_at").map_or_else(|| "unknown".to_string(), |t| t.format("%Y-%m-%d").to_string());

    let mut body = format!(
        "State: {} | Comments: {comment_count} | Reactions: {reactions} | Updated: {updated}",
        json_str(meta, "state").unwrap_or("unknown"),
    );

    let description = json_str(meta, "body").unwrap_or("").trim();
    if !description.is_empty() {
        body.push_str("\n\nDescription:\n");
        body.push_str(description);
    }

    let comments = resolver.issue_comments(owner, repo, number).await?;
    let rows = comments.as_array().cloned().unwrap_or_default();
    if !rows.is_empty() {
        body.push_str(&format!("\n\nComments ({comment_count}):"));
        for row in &rows {
            let text = json_str(row, "body").unwrap_or("");
            body.push_str(&format!("\n- {}: {}", comment_login(row), one_line(text, COMMENT_PREVIEW_CHARS)));
        }
    }

    let item = ItemContext {
        number: Some(number),
        is_pull: meta.get("pull_request").is_some(),
        body: description,
        comments: &rows,
    };
    let context = resolver.pr_context(owner, repo, &item).await?;
    if !context.is_empty() {
        body.push_str("\n\n");
        body.push_str(&context);
    }

    Ok(truncate_with_ellipsis(&body, ISSUE_BODY_CAP))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::cache::RunCache;
    use crate::collect::client::GithubClient;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn engagement_alone_makes_an_item_notable() {
        // Five comments, no reactions, no labels.
        let meta = json!({"comments": 5, "reactions": {"total_count": 0}, "labels": []});
        assert!(is_notable(&meta));
    }

    #[test]
    fn reactions_count_toward_engagement() {
        let meta = json!({"comments": 1, "reactions": {"total_count": 2}});
        assert!(is_notable(&meta));
    }

    #[test]
    fn low_engagement_without_labels_is_not_notable() {
        let meta = json!({"comments": 2, "reactions": {"total_count": 0}, "labels": []});
        assert!(!is_notable(&meta));
    }

    #[test]
    fn notable_label_substring_matches() {
        let meta = json!({"comments": 0, "labels": [{"name": "Breaking-Change: config"}]});
        assert!(is_notable(&meta));
        let meta = json!({"comments": 0, "labels": [{"name": "SECURITY"}]});
        assert!(is_notable(&meta));
    }

    #[test]
    fn unrelated_labels_are_not_notable() {
        let meta = json!({"comments": 0, "labels": [{"name": "question"}, {"name": "wontfix"}]});
        assert!(!is_notable(&meta));
    }

    #[test]
    fn missing_fields_default_to_not_notable() {
        assert!(!is_notable(&json!({})));
    }

    fn resolver_for(server: &MockServer) -> ReferenceResolver {
        let client = Arc::new(GithubClient::new(None, server.uri()).unwrap());
        ReferenceResolver::new(client, Arc::new(RunCache::new()), true, "backend", Vec::new())
    }

    async fn mount_comments(server: &MockServer, number: u64, comments: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/octo/demo/issues/{number}/comments")))
            .respond_with(ResponseTemplate::new(200).set_body_json(comments))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn issue_body_has_header_description_and_comments() {
        let server = MockServer::start().await;
        mount_comments(
            &server,
            12,
            json!([
                {"body": "same here", "user": {"login": "alice"}},
                {"body": "workaround:\nset the flag", "user": {"login": "bob"}}
            ]),
        )
        .await;

        let meta = json!({
            "number": 12,
            "state": "open",
            "comments": 5,
            "reactions": {"total_count": 0},
            "updated_at": "2026-02-14T10:00:00Z",
            "body": "The scheduler stalls under load."
        });

        let resolver = resolver_for(&server);
        let body = build_issue_body(&resolver, "octo", "demo", &meta).await.unwrap();

        assert!(body.starts_with("State: open | Comments: 5 | Reactions: 0 | Updated: 2026-02-14"));
        assert!(body.contains("Description:\nThe scheduler stalls under load."));
        assert!(body.contains("Comments (5):"));
        assert!(body.contains("- alice: same here"));
        assert!(body.contains("- bob: workaround: set the flag"));
    }

    #[tokio::test]
    async fn issue_body_is_capped() {
        let server = MockServer::start().await;
        mount_comments(&server, 9, json!([])).await;

        let meta = json!({
            "number": 9,
            "state": "open",
            "comments": 0,
            "updated_at": "2026-02-14T10:00:00Z",
            "body": "x".repeat(10_000)
        });

        let resolver = resolver_for(&server);
        let body = build_issue_body(&resolver, "octo", "demo", &meta).await.unwrap();
        assert_eq!(body.chars().count(), 4_000);
        assert!(body.ends_with('…'));
    }

    #[tokio::test]
    async fn collector_keeps_only_notable_recent_items() {
        let server = MockServer::start().await;
        let cutoff = DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z").unwrap().to_utc();

        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/issues"))
            .and(query_param("state", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "number": 1, "title": "Busy discussion", "state": "open",
                    "html_url": "https://github.com/octo/demo/issues/1",
                    "comments": 6, "updated_at": "2026-02-10T00:00:00Z"
                },
                {
                    "number": 2, "title": "Quiet question", "state": "open",
                    "html_url": "https://github.com/octo/demo/issues/2",
                    "comments": 0, "updated_at": "2026-02-11T00:00:00Z"
                }
            ])))
            .mount(&server)
            .await;
        mount_comments(&server, 1, json!([])).await;

        let repo: RepoRef = serde_yaml::from_str("{owner: octo, name: demo}").unwrap();
        let collector = IssueCollector::new(resolver_for(&server), vec![repo], cutoff, 2);
        let items = collector.collect().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "[Issue] Busy discussion");
        assert_eq!(items[0].source, SourceKind::Issue);
    }

    #[tokio::test]
    async fn pr_items_are_titled_as_pr() {
        let server = MockServer::start().await;
        let cutoff = DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z").unwrap().to_utc();

        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "number": 3, "title": "Rework pipeline", "state": "open",
                    "html_url": "https://github.com/octo/demo/pull/3",
                    "comments": 4, "updated_at": "2026-02-12T00:00:00Z",
                    "pull_request": {"url": "https://api.github.com/repos/octo/demo/pulls/3"}
                }
            ])))
            .mount(&server)
            .await;
        mount_comments(&server, 3, json!([])).await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/pulls/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "number": 3, "title": "Rework pipeline", "state": "open"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/demo/pulls/3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let repo: RepoRef = serde_yaml::from_str("{owner: octo, name: demo}").unwrap();
        let collector = IssueCollector::new(resolver_for(&server), vec![repo], cutoff, 2);
        let items = collector.collect().await.unwrap();

        assert_eq!(items.len(), 1);
        assert!(items[0].title.starts_with("[PR] "));
        assert!(items[0].body.contains("PR Compare:"));
    }
}

//! Reference resolution: one injected capability shared by collectors and
//! enrichers.
//!
//! Stitches "resolve a reference → fetch meta → fetch compare → format" into
//! a single path. All fetches go through the shared [`RunCache`], so the
//! fan-in from releases, issues, and feeds never issues duplicate requests.

use crate::Result;
use crate::collect::cache::{CacheValue, RunCache};
use crate::collect::client::GithubClient;
use crate::collect::compare::{CompareInfo, FileChange, PullMeta, format_compare_summary, format_pull_compare};
use crate::collect::reference::extract_references;
use crate::collect::text::{one_line, truncate_with_ellipsis};
use crate::collect::{json_str, json_u64};
use compact_str::CompactString;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "  resolver";

/// Reference limit applied on token-less runs to protect the rate budget.
pub(crate) const UNTOKENED_REF_LIMIT: usize = 5;

/// First-N comments included in a linked reference block.
const LINKED_COMMENTS_WITH_TOKEN: usize = 10;
const LINKED_COMMENTS_WITHOUT_TOKEN: usize = 3;

/// Single comment page requested when running without a token.
pub(crate) const UNTOKENED_COMMENT_PAGE: usize = 30;

const COMMENT_PREVIEW_CHARS: usize = 300;
const REFERENCE_BODY_PREVIEW_CHARS: usize = 500;

/// The item being enriched, as seen by [`ReferenceResolver::pr_context`].
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    /// The item's own number when it is an issue or PR.
    pub number: Option<u64>,
    pub is_pull: bool,
    pub body: &'a str,
    /// Comment payloads already fetched for the item.
    pub comments: &'a [Value],
}

/// Resolves linked references into enriched context blocks.
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    client: Arc<GithubClient>,
    cache: Arc<RunCache>,
    deep_pr_crawl: bool,
    section: CompactString,
    file_filters: Arc<[Regex]>,
}

impl ReferenceResolver {
    #[must_use]
    pub fn new(
        client: Arc<GithubClient>,
        cache: Arc<RunCache>,
        deep_pr_crawl: bool,
        section: impl Into<CompactString>,
        file_filters: Vec<Regex>,
    ) -> Self {
        Self {
            client,
            cache,
            deep_pr_crawl,
            section: section.into(),
            file_filters: file_filters.into(),
        }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<GithubClient> {
        &self.client
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<RunCache> {
        &self.cache
    }

    #[must_use]
    pub const fn deep_pr_crawl(&self) -> bool {
        self.deep_pr_crawl
    }

    /// Reference-count limit for extraction; unbounded with a token.
    #[must_use]
    pub fn reference_limit(&self) -> Option<usize> {
        if self.client.token_present() { None } else { Some(UNTOKENED_REF_LIMIT) }
    }

    /// Issue (or PR) metadata; `None` once the upstream said 404.
    pub async fn issue_meta(&self, owner: &str, repo: &str, number: u64) -> Result<Option<Arc<Value>>> {
        let key = format!("{owner}/{repo}#{number}");
        let value = self
            .cache
            .fetch("issue_meta", &key, || async move {
                let path = format!("/repos/{owner}/{repo}/issues/{number}");
                Ok(CacheValue::from_option(self.client.get_json(&path, &[]).await?))
            })
            .await?;
        Ok(value.as_json().cloned())
    }

    /// All comments for an issue/PR: paginated with a token, a single capped
    /// page without one.
    pub async fn issue_comments(&self, owner: &str, repo: &str, number: u64) -> Result<Arc<Value>> {
        let key = format!("{owner}/{repo}#{number}");
        let value = self
            .cache
            .fetch("issue_comments", &key, || async move {
                let path = format!("/repos/{owner}/{repo}/issues/{number}/comments");
                let rows = if self.client.token_present() {
                    self.client.get_paginated(&path, &[]).await?
                } else {
                    self.client.get_capped(&path, &[], UNTOKENED_COMMENT_PAGE).await?
                };
                Ok(CacheValue::json(Value::Array(rows)))
            })
            .await?;
        Ok(value.as_json().cloned().unwrap_or_else(|| Arc::new(Value::Array(Vec::new()))))
    }

    /// Pull-request metadata; `None` once the upstream said 404.
    pub async fn pull_meta(&self, owner: &str, repo: &str, number: u64) -> Result<Option<Arc<Value>>> {
        let key = format!("{owner}/{repo}#{number}");
        let value = self
            .cache
            .fetch("pull_meta", &key, || async move {
                let path = format!("/repos/{owner}/{repo}/pulls/{number}");
                Ok(CacheValue::from_option(self.client.get_json(&path, &[]).await?))
            })
            .await?;
        Ok(value.as_json().cloned())
    }

    /// Changed files of a pull request. Rows that don't parse are skipped.
    pub async fn pull_files(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<FileChange>> {
        let key = format!("{owner}/{repo}#{number}");
        let value = self
            .cache
            .fetch("pull_files", &key, || async move {
                let path = format!("/repos/{owner}/{repo}/pulls/{number}/files");
                let rows = if self.client.token_present() {
                    self.client.get_paginated(&path, &[]).await?
                } else {
                    self.client.get_capped(&path, &[], UNTOKENED_COMMENT_PAGE).await?
                };
                Ok(CacheValue::json(Value::Array(rows)))
            })
            .await?;

        let files = value
            .as_json()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect();
        Ok(files)
    }

    /// A labeled compare block for one pull request, or `None` when the PR is
    /// unknown or its metadata doesn't parse.
    pub async fn pull_compare_block(&self, owner: &str, repo: &str, number: u64, label: &str) -> Result<Option<String>> {
        let Some(meta_value) = self.pull_meta(owner, repo, number).await? else {
            return Ok(None);
        };

        let meta: PullMeta = match serde_json::from_value((*meta_value).clone()) {
            Ok(meta) => meta,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "Unparseable PR metadata for {owner}/{repo}#{number}: {e}");
                return Ok(None);
            }
        };

        let files = self.pull_files(owner, repo, number).await?;
        let block = format_pull_compare(&meta, &files, &self.section, &self.file_filters);
        Ok(Some(format!("{label}:\n{block}")))
    }

    /// Formatted summary of the compare endpoint between two tags, memoized
    /// (including the negative) for the run.
    pub async fn compare_summary(&self, owner: &str, repo: &str, base: &str, head: &str) -> Result<Option<String>> {
        let key = format!("{owner}/{repo} {base}...{head}");
        let value = self
            .cache
            .fetch("compare", &key, || async move {
                let path = format!("/repos/{owner}/{repo}/compare/{base}...{head}");
                match self.client.get_json(&path, &[]).await? {
                    None => Ok(CacheValue::Absent),
                    Some(payload) => match serde_json::from_value::<CompareInfo>(payload) {
                        Ok(info) => Ok(CacheValue::text(format_compare_summary(base, head, &info))),
                        Err(e) => {
                            log::warn!(target: LOG_TARGET, "Unparseable compare payload for {owner}/{repo} {base}...{head}: {e}");
                            Ok(CacheValue::Absent)
                        }
                    },
                }
            })
            .await?;
        Ok(value.as_text().map(str::to_string))
    }

    /// Per-item context: the item's own compare block when it is a PR, else
    /// compare blocks for every linked PR referenced from the body and
    /// comments. Empty when deep crawling is disabled.
    pub async fn pr_context(&self, owner: &str, repo: &str, item: &ItemContext<'_>) -> Result<String> {
        if !self.deep_pr_crawl {
            return Ok(String::new());
        }

        if item.is_pull {
            if let Some(number) = item.number {
                return Ok(self.pull_compare_block(owner, repo, number, "PR Compare").await?.unwrap_or_default());
            }
        }

        let mut ref_text = item.body.to_string();
        for comment in item.comments {
            if let Some(body) = json_str(comment, "body") {
                ref_text.push('\n');
                ref_text.push_str(body);
            }
        }

        let mut blocks = Vec::new();
        for number in extract_references(&ref_text, owner, repo, self.reference_limit()) {
            let Some(meta) = self.issue_meta(owner, repo, number).await? else {
                continue;
            };
            if meta.get("pull_request").is_some() {
                if let Some(block) = self.pull_compare_block(owner, repo, number, &format!("Linked PR #{number}")).await? {
                    blocks.push(block);
                }
            }
        }

        Ok(blocks.join("\n\n"))
    }

    /// The `Linked PR/Issue references:` section used by the release
    /// deep-crawl: one full block per reference, comments included.
    pub async fn linked_reference_section(&self, owner: &str, repo: &str, text: &str) -> Result<Option<String>> {
        if !self.deep_pr_crawl {
            return Ok(None);
        }

        let numbers = extract_references(text, owner, repo, self.reference_limit());
        if numbers.is_empty() {
            return Ok(None);
        }

        let mut blocks = Vec::with_capacity(numbers.len());
        for number in numbers {
            if let Some(block) = self.reference_block(owner, repo, number).await? {
                blocks.push(block);
            }
        }

        if blocks.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("Linked PR/Issue references:\n\n{}", blocks.join("\n\n"))))
    }

    /// One reference block: meta line, body preview, first-N comments, and a
    /// compare block when the reference turns out to be a PR.
    async fn reference_block(&self, owner: &str, repo: &str, number: u64) -> Result<Option<String>> {
        let Some(meta) = self.issue_meta(owner, repo, number).await? else {
            log::info!(target: LOG_TARGET, "Reference {owner}/{repo}#{number} not found, skipping");
            return Ok(None);
        };

        let is_pull = meta.get("pull_request").is_some();
        let title = json_str(&meta, "title").unwrap_or("");
        let state = json_str(&meta, "state").unwrap_or("unknown");

        let mut block = format!("#{number} [{}] {title} (state: {state})", if is_pull { "PR" } else { "Issue" });

        if let Some(body) = json_str(&meta, "body") {
            let trimmed = body.trim();
            if !trimmed.is_empty() {
                block.push('\n');
                block.push_str(&truncate_with_ellipsis(trimmed, REFERENCE_BODY_PREVIEW_CHARS));
            }
        }

        let comments = self.issue_comments(owner, repo, number).await?;
        let cap = if self.client.token_present() {
            LINKED_COMMENTS_WITH_TOKEN
        } else {
            LINKED_COMMENTS_WITHOUT_TOKEN
        };
        if let Some(rows) = comments.as_array() {
            if !rows.is_empty() {
                block.push_str("\nComments:");
                for row in rows.iter().take(cap) {
                    let body = json_str(row, "body").unwrap_or("");
                    block.push_str(&format!("\n- {}: {}", comment_login(row), one_line(body, COMMENT_PREVIEW_CHARS)));
                }
            }
        }

        if is_pull {
            if let Some(compare) = self.pull_compare_block(owner, repo, number, "PR Compare").await? {
                block.push('\n');
                block.push_str(&compare);
            }
        }

        Ok(Some(block))
    }
}

/// Author login of a comment payload; tolerates deleted users.
pub(crate) fn comment_login(comment: &Value) -> &str {
    comment.get("user").and_then(|u| u.get("login")).and_then(Value::as_str).unwrap_or("unknown")
}

/// Engagement of an issue/PR payload: comments plus total reactions.
pub(crate) fn engagement_score(meta: &Value) -> u64 {
    let reactions = meta.get("reactions").map_or(0, |r| json_u64(r, "total_count"));
    json_u64(meta, "comments") + reactions
}

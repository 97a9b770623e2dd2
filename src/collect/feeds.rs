//! Syndication feed collection and enrichment.
//!
//! Parses RSS 2.0 / Atom 1.0 feeds, keeps entries within the cutoff, and
//! upgrades entry bodies: Redmine-style issue URLs are resolved through the
//! tracker's JSON API, platform issue/PR URLs go through the same enrichment
//! path as the issue collector, and everything else falls back to the
//! tag-stripped entry summary.

use crate::Result;
use crate::collect::cache::CacheValue;
use crate::collect::issues::build_issue_body;
use crate::collect::resolver::ReferenceResolver;
use crate::collect::text::{strip_html, truncate_with_ellipsis};
use crate::collect::throttler::Throttler;
use crate::collect::{Item, SourceKind, json_str};
use crate::config::FeedRef;
use crate::error::DigestError;
use chrono::{DateTime, Utc};
use core::time::Duration;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

const LOG_TARGET: &str = "     feeds";

/// Feed fetches follow at most this many redirects.
const MAX_REDIRECTS: usize = 5;

const FEED_TIMEOUT: Duration = Duration::from_secs(30);

const FEED_BODY_CAP: usize = 4_000;

/// Redmine-style issue URL: `https://host/issues/N`.
static REDMINE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(https?://[^/]+)/issues/([0-9]{1,9})/?$").expect("invalid regex"));

/// Platform issue/PR URL: `https://host/owner/repo/(issues|pull)/N`.
static PLATFORM_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^/]+/([^/]+)/([^/]+)/(?:issues|pull)/([0-9]{1,9})/?$").expect("invalid regex"));

/// Collects and enriches feed entries for one category.
#[derive(Debug, Clone)]
pub struct FeedCollector {
    resolver: ReferenceResolver,
    feeds: Vec<FeedRef>,
    cutoff: DateTime<Utc>,
    http: reqwest::Client,
    feed_threads: usize,
}

impl FeedCollector {
    pub fn new(resolver: ReferenceResolver, feeds: Vec<FeedRef>, cutoff: DateTime<Utc>, feed_threads: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tech-digest")
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|e| DigestError::Config {
                context: "feeds".into(),
                detail: format!("unable to build feed HTTP client: {e}"),
            })?;

        Ok(Self {
            resolver,
            feeds,
            cutoff,
            http,
            feed_threads,
        })
    }

    pub async fn collect(&self) -> Result<Vec<Item>> {
        let throttler = Throttler::new(self.feed_threads);

        let results = futures_util::future::join_all(self.feeds.iter().map(|feed| {
            let throttler = Arc::clone(&throttler);
            async move {
                let _permit = throttler.acquire().await;
                match self.collect_feed(feed).await {
                    Ok(items) => items,
                    Err(e) => {
                        log::warn!(target: LOG_TARGET, "Could not collect feed '{}': {e}", feed.display_name);
                        Vec::new()
                    }
                }
            }
        }))
        .await;

        Ok(results.into_iter().flatten().collect())
    }

    async fn collect_feed(&self, feed: &FeedRef) -> Result<Vec<Item>> {
        let response = self.http.get(&feed.url).send().await.map_err(|e| DigestError::Transport {
            url: feed.url.clone(),
            source: e,
        })?;
        if !response.status().is_success() {
            return Err(DigestError::Http {
                status: response.status().as_u16(),
                url: feed.url.clone(),
            });
        }
        let bytes = response.bytes().await.map_err(|e| DigestError::Transport {
            url: feed.url.clone(),
            source: e,
        })?;

        let parsed = feed_rs::parser::parse(bytes.as_ref()).map_err(|e| DigestError::Feed {
            url: feed.url.clone(),
            detail: e.to_string(),
        })?;

        let mut items = Vec::new();
        for entry in &parsed.entries {
            let Some(published_at) = entry.published.or(entry.updated) else { continue };
            if published_at < self.cutoff {
                continue;
            }
            let Some(link) = entry.links.first().map(|l| l.href.clone()) else { continue };
            let title = entry.title.as_ref().map(|t| t.content.clone()).unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let fallback = entry
                .summary
                .as_ref()
                .map(|t| t.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                .unwrap_or_default();

            let body = self.enrich_entry(&link, &fallback).await;

            items.push(Item {
                title: format!("{}: {title}", feed.display_name),
                url: link,
                published_at,
                body: truncate_with_ellipsis(&body, FEED_BODY_CAP),
                source: SourceKind::Feed,
            });
        }

        log::info!(target: LOG_TARGET, "Kept {} entry(ies) from '{}'", items.len(), feed.display_name);
        Ok(items)
    }

    /// Enrichment ladder: Redmine API, then platform issue/PR enrichment,
    /// then the tag-stripped summary. Enrichment failures fall back rather
    /// than dropping the entry.
    async fn enrich_entry(&self, link: &str, fallback: &str) -> String {
        if let Some(caps) = REDMINE_URL.captures(link) {
            let base = caps.get(1).map_or("", |m| m.as_str());
            let number = caps.get(2).map_or("", |m| m.as_str());
            match self.redmine_body(base, number).await {
                Ok(Some(body)) => return body,
                Ok(None) => {}
                Err(e) => log::warn!(target: LOG_TARGET, "Redmine enrichment failed for {link}: {e}"),
            }
        }

        if let Some(caps) = PLATFORM_URL.captures(link) {
            let owner = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let repo = caps.get(2).map_or("", |m| m.as_str()).to_string();
            let number = caps.get(3).and_then(|m| m.as_str().parse::<u64>().ok());
            if let Some(number) = number {
                match self.platform_body(&owner, &repo, number).await {
                    Ok(Some(body)) => return body,
                    Ok(None) => {}
                    Err(e) => log::warn!(target: LOG_TARGET, "Platform enrichment failed for {link}: {e}"),
                }
            }
        }

        strip_html(fallback)
    }

    /// Redmine issue description plus its non-empty journal notes.
    async fn redmine_body(&self, base: &str, number: &str) -> Result<Option<String>> {
        let key = format!("{base}/issues/{number}.json?include=journals");
        let url = key.clone();

        let value = self
            .resolver
            .cache()
            .fetch("redmine", &key, || async move {
                let response = self.http.get(&url).send().await.map_err(|e| DigestError::Transport {
                    url: url.clone(),
                    source: e,
                })?;
                if response.status().as_u16() == 404 {
                    return Ok(CacheValue::Absent);
                }
                if !response.status().is_success() {
                    return Err(DigestError::Http {
                        status: response.status().as_u16(),
                        url: url.clone(),
                    });
                }
                let payload: Value = response.json().await.map_err(|e| DigestError::Parse {
                    url: url.clone(),
                    detail: e.to_string(),
                })?;
                Ok(CacheValue::json(payload))
            })
            .await?;

        let Some(payload) = value.as_json() else { return Ok(None) };
        let Some(issue) = payload.get("issue") else { return Ok(None) };

        let mut body = json_str(issue, "description").unwrap_or("").trim().to_string();

        if let Some(journals) = issue.get("journals").and_then(Value::as_array) {
            let notes: Vec<String> = journals
                .iter()
                .filter_map(|journal| {
                    let text = json_str(journal, "notes")?.trim();
                    if text.is_empty() {
                        return None;
                    }
                    let author = journal
                        .get("user")
                        .and_then(|u| u.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    let created = json_str(journal, "created_on").unwrap_or("");
                    Some(format!("- {author} ({created}): {text}"))
                })
                .collect();

            if !notes.is_empty() {
                if !body.is_empty() {
                    body.push_str("\n\n");
                }
                body.push_str("Journal:\n");
                body.push_str(&notes.join("\n"));
            }
        }

        if body.is_empty() { Ok(None) } else { Ok(Some(body)) }
    }

    /// Platform issue/PR enrichment through the shared resolver path.
    async fn platform_body(&self, owner: &str, repo: &str, number: u64) -> Result<Option<String>> {
        let Some(meta) = self.resolver.issue_meta(owner, repo, number).await? else {
            return Ok(None);
        };
        let body = build_issue_body(&self.resolver, owner, repo, &meta).await?;
        Ok(Some(body))
    }
}

//! Category orchestration: runs the configured source jobs for each category
//! under bounded worker pools, applies release deduplication, and enforces
//! the deterministic output ordering.

use crate::collect::advisories::AdvisoryCollector;
use crate::collect::cache::RunCache;
use crate::collect::client::GithubClient;
use crate::collect::dedupe::{deduplicate_release_versions, sort_items};
use crate::collect::feeds::FeedCollector;
use crate::collect::issues::IssueCollector;
use crate::collect::registry::RegistryCollector;
use crate::collect::release::ReleaseCollector;
use crate::collect::resolver::ReferenceResolver;
use crate::collect::throttler::Throttler;
use crate::collect::{Item, RunId};
use crate::config::{Category, CategorySources, RunOptions, SourcesConfig};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::IntoEnumIterator;

const LOG_TARGET: &str = "   collect";

/// One source job of a category. Variants carry their configured collector;
/// dispatch is a single `collect()` match.
enum SourceJob {
    Release(ReleaseCollector),
    Issues(IssueCollector),
    Advisories(AdvisoryCollector),
    Feeds(FeedCollector),
    Registry(RegistryCollector),
}

impl SourceJob {
    const fn label(&self) -> &'static str {
        match self {
            Self::Release(_) => "release",
            Self::Issues(_) => "issue",
            Self::Advisories(_) => "advisory",
            Self::Feeds(_) => "feed",
            Self::Registry(_) => "registry",
        }
    }

    async fn collect(&self) -> crate::Result<Vec<Item>> {
        match self {
            Self::Release(collector) => collector.collect().await,
            Self::Issues(collector) => collector.collect().await,
            Self::Advisories(collector) => collector.collect().await,
            Self::Feeds(collector) => collector.collect().await,
            Self::Registry(collector) => collector.collect().await,
        }
    }
}

/// Runs the three categories and hands back one ordered item list per
/// category for the summarization step.
pub struct CategoryOrchestrator {
    client: Arc<GithubClient>,
    cache: Arc<RunCache>,
    options: RunOptions,
    cutoff: DateTime<Utc>,
    run_id: RunId,
    registry_base: Option<String>,
}

impl CategoryOrchestrator {
    #[must_use]
    pub fn new(client: Arc<GithubClient>, cache: Arc<RunCache>, options: RunOptions, cutoff: DateTime<Utc>) -> Self {
        Self {
            client,
            cache,
            options,
            cutoff,
            run_id: RunId::stamp(),
            registry_base: None,
        }
    }

    /// Point the registry collector at a different base URL (tests).
    #[must_use]
    pub fn with_registry_base(mut self, base_url: impl Into<String>) -> Self {
        self.registry_base = Some(base_url.into());
        self
    }

    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    #[must_use]
    pub const fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Collect every category, in the stable category order.
    pub async fn collect_all(&self, config: &SourcesConfig) -> BTreeMap<Category, Vec<Item>> {
        let mut digest = BTreeMap::new();
        for category in Category::iter() {
            let items = self.collect_category(category, config.category(category)).await;
            let _ = digest.insert(category, items);
        }
        digest
    }

    /// Collect one category: build its source jobs, run them under the
    /// source-level pool, then dedupe and sort.
    pub async fn collect_category(&self, category: Category, sources: &CategorySources) -> Vec<Item> {
        let run_id = &self.run_id;
        let jobs = self.build_jobs(category, sources);
        if jobs.is_empty() {
            log::info!(target: LOG_TARGET, "[{run_id}] No sources configured for category '{category}'");
            return Vec::new();
        }

        log::info!(target: LOG_TARGET, "[{run_id}] Collecting category '{category}' with {} job(s)", jobs.len());

        let parallel = self.options.collect_parallel && jobs.len() > 1 && self.options.max_collect_threads > 1;
        let results: Vec<Vec<Item>> = if parallel {
            let throttler = Throttler::new(self.options.max_collect_threads);
            join_all(jobs.iter().map(|job| {
                let throttler = Arc::clone(&throttler);
                async move {
                    let _permit = throttler.acquire().await;
                    self.run_job(category, job).await
                }
            }))
            .await
        } else {
            let mut sequential = Vec::with_capacity(jobs.len());
            for job in &jobs {
                sequential.push(self.run_job(category, job).await);
            }
            sequential
        };

        let items: Vec<Item> = results.into_iter().flatten().collect();
        let items: Vec<Item> = items
            .into_iter()
            .filter(|item| {
                debug_assert!(item.published_at >= self.cutoff, "collector emitted an item older than the cutoff");
                item.published_at >= self.cutoff && !item.title.is_empty() && !item.url.is_empty()
            })
            .collect();

        let mut items = deduplicate_release_versions(items);
        sort_items(&mut items);

        if items.is_empty() {
            log::info!(target: LOG_TARGET, "[{run_id}] No data for category '{category}'");
        } else {
            log::info!(target: LOG_TARGET, "[{run_id}] Collected {} item(s) for category '{category}'", items.len());
        }

        items
    }

    /// Failure policy: a job that fails is logged and reduced to an empty
    /// list; sibling jobs continue.
    async fn run_job(&self, category: Category, job: &SourceJob) -> Vec<Item> {
        match job.collect().await {
            Ok(items) => items,
            Err(e) => {
                log::warn!(
                    target: LOG_TARGET,
                    "[{}] Job '{}' failed for category '{category}', continuing without it: {e}",
                    self.run_id,
                    job.label()
                );
                Vec::new()
            }
        }
    }

    fn build_jobs(&self, category: Category, sources: &CategorySources) -> Vec<SourceJob> {
        let resolver = ReferenceResolver::new(
            Arc::clone(&self.client),
            Arc::clone(&self.cache),
            self.options.deep_pr_crawl,
            category.to_string(),
            Vec::new(),
        );
        let repo_threads = if self.options.collect_parallel { self.options.max_repo_threads } else { 1 };

        let mut jobs = Vec::new();

        if !sources.repos.is_empty() {
            jobs.push(SourceJob::Release(ReleaseCollector::new(
                resolver.clone(),
                sources.repos.clone(),
                self.cutoff,
                repo_threads,
            )));
            jobs.push(SourceJob::Issues(IssueCollector::new(
                resolver.clone(),
                sources.repos.clone(),
                self.cutoff,
                repo_threads,
            )));
        }

        if !sources.advisories.is_empty() {
            jobs.push(SourceJob::Advisories(AdvisoryCollector::new(
                resolver.clone(),
                sources.advisories.clone(),
                self.cutoff,
            )));
        }

        if !sources.feeds.is_empty() {
            match FeedCollector::new(resolver.clone(), sources.feeds.clone(), self.cutoff, repo_threads) {
                Ok(collector) => jobs.push(SourceJob::Feeds(collector)),
                Err(e) => log::warn!(target: LOG_TARGET, "[{}] Could not build the feed collector: {e}", self.run_id),
            }
        }

        if !sources.registries.is_empty() {
            match RegistryCollector::new(
                resolver,
                sources.registries.clone(),
                self.cutoff,
                self.registry_base.as_deref(),
                repo_threads,
            ) {
                Ok(collector) => jobs.push(SourceJob::Registry(collector)),
                Err(e) => log::warn!(target: LOG_TARGET, "[{}] Could not build the registry collector: {e}", self.run_id),
            }
        }

        jobs
    }
}

//! Package-registry collection: one item per package for the newest version
//! published within the cutoff.

use crate::Result;
use crate::collect::cache::CacheValue;
use crate::collect::release::version_sort_key;
use crate::collect::resolver::ReferenceResolver;
use crate::collect::text::truncate_with_ellipsis;
use crate::collect::throttler::Throttler;
use crate::collect::{Item, SourceKind, json_str};
use crate::error::DigestError;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use core::time::Duration;
use semver::Version;
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "  registry";

/// Default base URL of the package registry.
pub const REGISTRY_BASE: &str = "https://registry.npmjs.org";

/// Web page base for package links.
const REGISTRY_WEB_BASE: &str = "https://www.npmjs.com/package";

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

const REGISTRY_BODY_CAP: usize = 2_000;

/// Collects registry release items for the configured packages.
#[derive(Debug, Clone)]
pub struct RegistryCollector {
    resolver: ReferenceResolver,
    packages: Vec<CompactString>,
    cutoff: DateTime<Utc>,
    base_url: String,
    http: reqwest::Client,
    worker_threads: usize,
}

impl RegistryCollector {
    pub fn new(
        resolver: ReferenceResolver,
        packages: Vec<CompactString>,
        cutoff: DateTime<Utc>,
        base_url: Option<&str>,
        worker_threads: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("tech-digest")
            .timeout(REGISTRY_TIMEOUT)
            .build()
            .map_err(|e| DigestError::Config {
                context: "registry".into(),
                detail: format!("unable to build registry HTTP client: {e}"),
            })?;

        Ok(Self {
            resolver,
            packages,
            cutoff,
            base_url: base_url.unwrap_or(REGISTRY_BASE).trim_end_matches('/').to_string(),
            http,
            worker_threads,
        })
    }

    pub async fn collect(&self) -> Result<Vec<Item>> {
        let throttler = Throttler::new(self.worker_threads);

        let results = futures_util::future::join_all(self.packages.iter().map(|package| {
            let throttler = Arc::clone(&throttler);
            async move {
                let _permit = throttler.acquire().await;
                match self.collect_package(package).await {
                    Ok(item) => item,
                    Err(e) => {
                        log::warn!(target: LOG_TARGET, "Could not collect registry data for '{package}': {e}");
                        None
                    }
                }
            }
        }))
        .await;

        Ok(results.into_iter().flatten().collect())
    }

    async fn collect_package(&self, package: &str) -> Result<Option<Item>> {
        let Some(doc) = self.fetch_package_doc(package).await? else {
            log::info!(target: LOG_TARGET, "Package '{package}' not found in the registry");
            return Ok(None);
        };

        let Some((version, published_at)) = latest_within_cutoff(&doc, self.cutoff) else {
            log::debug!(target: LOG_TARGET, "No recent version of '{package}'");
            return Ok(None);
        };

        let mut body = json_str(&doc, "description").unwrap_or("").trim().to_string();
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(&format!("Published {}", published_at.format("%Y-%m-%d")));

        Ok(Some(Item {
            title: format!("{package} {version} released"),
            url: format!("{REGISTRY_WEB_BASE}/{package}/v/{version}"),
            published_at,
            body: truncate_with_ellipsis(&body, REGISTRY_BODY_CAP),
            source: SourceKind::Registry,
        }))
    }

    async fn fetch_package_doc(&self, package: &str) -> Result<Option<Arc<Value>>> {
        let url = format!("{}/{package}", self.base_url);

        let value = self
            .resolver
            .cache()
            .fetch("registry", package, || async move {
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

        Ok(value.as_json().cloned())
    }
}

/// Highest semver version whose publication time in the `time` map falls
/// within the cutoff, using the same `(version, time)` ordering as release
/// selection. The `created`/`modified` bookkeeping entries are ignored.
#[must_use]
pub fn latest_within_cutoff(doc: &Value, cutoff: DateTime<Utc>) -> Option<(String, DateTime<Utc>)> {
    let times = doc.get("time")?.as_object()?;

    let mut best: Option<(Version, String, DateTime<Utc>)> = None;
    for (version_text, published) in times {
        if version_text == "created" || version_text == "modified" {
            continue;
        }
        let Some(version) = version_sort_key(version_text) else { continue };
        let Some(published_at) = published
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.to_utc())
        else {
            continue;
        };
        if published_at < cutoff {
            continue;
        }

        let better = match &best {
            None => true,
            Some((best_version, _, best_at)) => (&version, &published_at) > (best_version, best_at),
        };
        if better {
            best = Some((version, version_text.clone(), published_at));
        }
    }

    best.map(|(_, text, at)| (text, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::cache::RunCache;
    use crate::collect::client::GithubClient;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn instant(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().to_utc()
    }

    fn doc() -> Value {
        json!({
            "name": "left-pad",
            "description": "String left pad",
            "dist-tags": {"latest": "1.4.0"},
            "time": {
                "created": "2014-01-01T00:00:00Z",
                "modified": "2026-02-12T00:00:00Z",
                "1.3.0": "2026-01-10T00:00:00Z",
                "1.4.0": "2026-02-12T00:00:00Z",
                "1.4.1-beta.1": "2026-02-13T00:00:00Z"
            }
        })
    }

    #[test]
    fn picks_highest_recent_version() {
        // 1.4.1-beta.1 is newer in time but higher in semver too; it wins.
        let (version, at) = latest_within_cutoff(&doc(), instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(version, "1.4.1-beta.1");
        assert_eq!(at, instant("2026-02-13T00:00:00Z"));
    }

    #[test]
    fn versions_before_the_cutoff_are_ignored() {
        let mut document = doc();
        document["time"]
            .as_object_mut()
            .unwrap()
            .remove("1.4.1-beta.1");
        let (version, _) = latest_within_cutoff(&document, instant("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(version, "1.4.0");
    }

    #[test]
    fn no_recent_version_yields_none() {
        assert!(latest_within_cutoff(&doc(), instant("2026-03-01T00:00:00Z")).is_none());
    }

    #[test]
    fn bookkeeping_entries_are_not_versions() {
        // `modified` is within the window but must never be selected.
        let document = json!({"time": {"created": "2026-02-10T00:00:00Z", "modified": "2026-02-10T00:00:00Z"}});
        assert!(latest_within_cutoff(&document, instant("2026-02-01T00:00:00Z")).is_none());
    }

    fn collector_for(server: &MockServer, packages: &[&str]) -> RegistryCollector {
        let client = Arc::new(GithubClient::new(None, server.uri()).unwrap());
        let resolver = ReferenceResolver::new(client, Arc::new(RunCache::new()), true, "frontend", Vec::new());
        RegistryCollector::new(
            resolver,
            packages.iter().map(|p| CompactString::from(*p)).collect(),
            instant("2026-02-01T00:00:00Z"),
            Some(&server.uri()),
            2,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn recent_package_becomes_a_release_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(doc()))
            .expect(1)
            .mount(&server)
            .await;

        let collector = collector_for(&server, &["left-pad"]);
        let items = collector.collect().await.unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title, "left-pad 1.4.1-beta.1 released");
        assert_eq!(item.url, "https://www.npmjs.com/package/left-pad/v/1.4.1-beta.1");
        assert_eq!(item.source, SourceKind::Registry);
        assert!(item.body.starts_with("String left pad"));
    }

    #[tokio::test]
    async fn missing_package_yields_no_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ghost-package"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let collector = collector_for(&server, &["ghost-package"]);
        assert!(collector.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_package_does_not_break_siblings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(doc()))
            .mount(&server)
            .await;

        let collector = collector_for(&server, &["broken", "left-pad"]);
        let items = collector.collect().await.unwrap();
        assert_eq!(items.len(), 1);
    }
}

//! The YAML source configuration: which repos, feeds, registries, and
//! advisory ecosystems are collected for each category.

use crate::Result;
use crate::error::DigestError;
use camino::Utf8Path;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fs;
use strum::{Display, EnumIter, EnumString};

/// A top-level grouping of sources with an independent configuration and a
/// stable output ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Frontend,
    Backend,
    Devops,
}

/// How releases are discovered for a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStrategy {
    /// Use published releases; fall back to tags when there are none.
    #[default]
    Auto,

    /// Only consider published releases.
    ReleasesOnly,

    /// Only consider tags.
    TagsOnly,
}

/// A repository watched by the release and issue collectors.
///
/// Recognized options are enumerated here; unknown keys are rejected when the
/// configuration is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoRef {
    /// Repository owner (user or organization).
    pub owner: CompactString,

    /// Repository name.
    pub name: CompactString,

    /// Human-readable name used in item titles. Defaults to the repo name.
    #[serde(default)]
    pub display_name: Option<CompactString>,

    #[serde(default)]
    pub release_strategy: ReleaseStrategy,

    /// Candidate changelog file paths checked when assembling release context.
    /// Empty means the built-in default set.
    #[serde(default)]
    pub release_notes_files: Vec<CompactString>,
}

impl RepoRef {
    /// The `owner/name` slug used in API paths and log lines.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// The name shown in item titles.
    #[must_use]
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// A syndication feed watched by the feed collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedRef {
    pub url: String,

    pub display_name: CompactString,
}

/// Sources configured for one category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategorySources {
    #[serde(default)]
    pub repos: Vec<RepoRef>,

    #[serde(default)]
    pub feeds: Vec<FeedRef>,

    /// Package names looked up in the package registry.
    #[serde(default)]
    pub registries: Vec<CompactString>,

    /// Advisory ecosystems (e.g. `npm`, `pip`, `rubygems`).
    #[serde(default)]
    pub advisories: Vec<CompactString>,
}

impl CategorySources {
    /// Returns `true` when no source of any kind is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repos.is_empty() && self.feeds.is_empty() && self.registries.is_empty() && self.advisories.is_empty()
    }
}

/// The full source configuration document, grouped by category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    #[serde(default)]
    pub frontend: CategorySources,

    #[serde(default)]
    pub backend: CategorySources,

    #[serde(default)]
    pub devops: CategorySources,
}

impl SourcesConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| DigestError::Io {
            context: format!("reading sources file '{path}'").into(),
            source: e,
        })?;
        Self::parse(&text).map_err(|e| match e {
            DigestError::Config { detail, .. } => DigestError::Config {
                context: format!("sources file '{path}'").into(),
                detail,
            },
            other => other,
        })
    }

    /// Parse a configuration document from YAML text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).map_err(|e| DigestError::Config {
            context: "sources".into(),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Access the sources for a category.
    #[must_use]
    pub fn category(&self, category: Category) -> &CategorySources {
        match category {
            Category::Frontend => &self.frontend,
            Category::Backend => &self.backend,
            Category::Devops => &self.devops,
        }
    }

    fn validate(&self) -> Result<()> {
        for category in [Category::Frontend, Category::Backend, Category::Devops] {
            for repo in &self.category(category).repos {
                if repo.owner.is_empty() || repo.name.is_empty() {
                    return Err(DigestError::Config {
                        context: "sources".into(),
                        detail: format!("{category}: repository entries need a non-empty owner and name"),
                    });
                }
            }
            for feed in &self.category(category).feeds {
                if url::Url::parse(&feed.url).is_err() {
                    return Err(DigestError::Config {
                        context: "sources".into(),
                        detail: format!("{category}: invalid feed url '{}'", feed.url),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
frontend:
  repos:
    - owner: facebook
      name: react
      display_name: React
      release_strategy: releases_only
      release_notes_files: [CHANGELOG.md]
  registries: [react]
  advisories: [npm]
backend:
  repos:
    - owner: rails
      name: rails
  feeds:
    - url: https://weblog.rubyonrails.org/feed/atom.xml
      display_name: Rails Blog
devops: {}
";

    #[test]
    fn parse_sample() {
        let config = SourcesConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.frontend.repos.len(), 1);
        let react = &config.frontend.repos[0];
        assert_eq!(react.slug(), "facebook/react");
        assert_eq!(react.display(), "React");
        assert_eq!(react.release_strategy, ReleaseStrategy::ReleasesOnly);
        assert_eq!(react.release_notes_files, vec![CompactString::from("CHANGELOG.md")]);

        assert_eq!(config.backend.feeds.len(), 1);
        assert!(config.devops.is_empty());
    }

    #[test]
    fn display_name_defaults_to_repo_name() {
        let config = SourcesConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.backend.repos[0].display(), "rails");
    }

    #[test]
    fn release_strategy_defaults_to_auto() {
        let config = SourcesConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.backend.repos[0].release_strategy, ReleaseStrategy::Auto);
    }

    #[test]
    fn unknown_repo_keys_are_rejected() {
        let text = r"
frontend:
  repos:
    - owner: a
      name: b
      release_channel: nightly
";
        let err = SourcesConfig::parse(text).unwrap_err();
        assert!(err.to_string().contains("release_channel"), "unexpected: {err}");
    }

    #[test]
    fn unknown_category_is_rejected() {
        let err = SourcesConfig::parse("mobile: {}").unwrap_err();
        assert!(matches!(err, DigestError::Config { .. }));
    }

    #[test]
    fn empty_owner_is_rejected() {
        let text = r"
devops:
  repos:
    - owner: ''
      name: terraform
";
        let err = SourcesConfig::parse(text).unwrap_err();
        assert!(err.to_string().contains("non-empty owner"));
    }

    #[test]
    fn invalid_feed_url_is_rejected() {
        let text = r"
backend:
  feeds:
    - url: not-a-url
      display_name: Broken
";
        let err = SourcesConfig::parse(text).unwrap_err();
        assert!(err.to_string().contains("invalid feed url"));
    }

    #[test]
    fn category_ordering_is_stable() {
        let mut categories = [Category::Devops, Category::Frontend, Category::Backend];
        categories.sort();
        assert_eq!(categories, [Category::Frontend, Category::Backend, Category::Devops]);
    }

    #[test]
    fn category_display_is_lowercase() {
        assert_eq!(Category::Frontend.to_string(), "frontend");
        assert_eq!(Category::Devops.to_string(), "devops");
    }
}

//! Security advisory collection from the platform's advisory database.

use crate::Result;
use crate::collect::cache::CacheValue;
use crate::collect::resolver::ReferenceResolver;
use crate::collect::text::truncate_with_ellipsis;
use crate::collect::{Item, SourceKind, json_datetime, json_str};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde_json::Value;

const LOG_TARGET: &str = "advisories";

/// Advisories fetched per ecosystem.
const ADVISORY_PAGE: usize = 50;

/// References listed in an advisory body.
const MAX_REFERENCES: usize = 3;

const ADVISORY_BODY_CAP: usize = 4_000;

/// Collects recently published advisories for the configured ecosystems.
#[derive(Debug, Clone)]
pub struct AdvisoryCollector {
    resolver: ReferenceResolver,
    ecosystems: Vec<CompactString>,
    cutoff: DateTime<Utc>,
}

impl AdvisoryCollector {
    #[must_use]
    pub fn new(resolver: ReferenceResolver, ecosystems: Vec<CompactString>, cutoff: DateTime<Utc>) -> Self {
        Self {
            resolver,
            ecosystems,
            cutoff,
        }
    }

    pub async fn collect(&self) -> Result<Vec<Item>> {
        let mut items = Vec::new();

        for ecosystem in &self.ecosystems {
            match self.collect_ecosystem(ecosystem).await {
                Ok(mut found) => items.append(&mut found),
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "Could not collect advisories for ecosystem '{ecosystem}': {e}");
                }
            }
        }

        Ok(items)
    }

    async fn collect_ecosystem(&self, ecosystem: &str) -> Result<Vec<Item>> {
        let client = self.resolver.client();
        let value = self
            .resolver
            .cache()
            .fetch("advisories", ecosystem, || async move {
                let query: Vec<(&str, String)> = vec![("ecosystem", ecosystem.to_string())];
                let rows = client.get_capped("/advisories", &query, ADVISORY_PAGE).await?;
                Ok(CacheValue::json(Value::Array(rows)))
            })
            .await?;

        let rows = value.as_json().and_then(|v| v.as_array().cloned()).unwrap_or_default();
        let items: Vec<Item> = rows.iter().filter_map(|row| self.advisory_item(ecosystem, row)).collect();

        log::info!(target: LOG_TARGET, "Kept {} advisory item(s) of {} for ecosystem '{ecosystem}'", items.len(), rows.len());
        Ok(items)
    }

    fn advisory_item(&self, ecosystem: &str, payload: &Value) -> Option<Item> {
        let published_at = json_datetime(payload, "published_at")?;
        if published_at < self.cutoff {
            return None;
        }

        let summary = json_str(payload, "summary")?;
        let url = json_str(payload, "html_url")?;
        let ghsa = json_str(payload, "ghsa_id").unwrap_or("advisory");

        let mut body = format!(
            "Severity: {} | Ecosystem: {ecosystem}",
            json_str(payload, "severity").unwrap_or("unknown"),
        );

        let packages: Vec<&str> = payload
            .get("vulnerabilities")
            .and_then(Value::as_array)
            .map(|vulns| {
                vulns
                    .iter()
                    .filter_map(|v| v.get("package").and_then(|p| p.get("name")).and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        if !packages.is_empty() {
            body.push_str(&format!(" | Packages: {}", packages.join(", ")));
        }

        if let Some(description) = json_str(payload, "description") {
            let trimmed = description.trim();
            if !trimmed.is_empty() {
                body.push_str("\n\n");
                body.push_str(trimmed);
            }
        }

        if let Some(references) = payload.get("references").and_then(Value::as_array) {
            let links: Vec<&str> = references.iter().filter_map(Value::as_str).take(MAX_REFERENCES).collect();
            if !links.is_empty() {
                body.push_str("\n\nReferences:");
                for link in links {
                    body.push_str(&format!("\n- {link}"));
                }
            }
        }

        Some(Item {
            title: format!("{summary} ({ghsa})"),
            url: url.to_string(),
            published_at,
            body: truncate_with_ellipsis(&body, ADVISORY_BODY_CAP),
            source: SourceKind::Advisory,
        })
    }
}

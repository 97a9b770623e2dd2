//! Rendering of normalized textual diff summaries.
//!
//! Minimal serde views of the pull-request, file-change, and compare payloads
//! with only the fields we need, plus the stable plain-text blocks built from
//! them. Nothing is fabricated: missing numbers default to zero and missing
//! URLs are omitted.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// Maximum file bullets in a release compare summary.
const COMPARE_FILE_BULLETS: usize = 20;

/// Minimal pull-request info with only the fields we need.
#[derive(Debug, Clone, Deserialize)]
pub struct PullMeta {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub merged_at: Option<String>,
    #[serde(default)]
    pub base: Option<BranchRef>,
    #[serde(default)]
    pub head: Option<BranchRef>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub commits: u64,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
}

impl PullMeta {
    /// Effective state: the API reports merged PRs as `closed`, but the
    /// digest wants to say `merged`.
    #[must_use]
    pub fn effective_state(&self) -> &str {
        if self.merged_at.is_some() { "merged" } else { &self.state }
    }
}

/// One side of a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref", default)]
    pub name: String,
}

/// A single changed file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileChange {
    pub filename: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

/// Compare endpoint payload (`<prev>...<cur>`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompareInfo {
    #[serde(default)]
    pub total_commits: u64,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub files: Vec<FileChange>,
}

/// Compile file-filter patterns case-insensitively. Invalid patterns are
/// dropped with a warning rather than failing the whole run.
#[must_use]
pub fn compile_filters(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(regex) => Some(regex),
            Err(e) => {
                log::warn!(target: "   compare", "Dropping invalid file filter '{pattern}': {e}");
                None
            }
        })
        .collect()
}

/// Keep files whose path matches at least one filter. With no filters, or
/// when no file matches, the unfiltered list is returned so a filter can
/// never hide every file.
#[must_use]
pub fn filter_files<'a>(files: &'a [FileChange], filters: &[Regex]) -> Vec<&'a FileChange> {
    if filters.is_empty() {
        return files.iter().collect();
    }

    let matched: Vec<&FileChange> = files
        .iter()
        .filter(|file| filters.iter().any(|filter| filter.is_match(&file.filename)))
        .collect();

    if matched.is_empty() { files.iter().collect() } else { matched }
}

/// Render the stable compare block for a pull request.
#[must_use]
pub fn format_pull_compare(meta: &PullMeta, files: &[FileChange], section: &str, filters: &[Regex]) -> String {
    let mut lines = Vec::with_capacity(files.len() + 4);
    lines.push(format!("PR #{}: {}", meta.number, meta.title));
    lines.push(format!(
        "State: {} | Base: {} | Head: {}",
        meta.effective_state(),
        meta.base.as_ref().map_or("", |b| b.name.as_str()),
        meta.head.as_ref().map_or("", |h| h.name.as_str()),
    ));
    lines.push(format!(
        "files={}, commits={}, +{}/-{}",
        meta.changed_files, meta.commits, meta.additions, meta.deletions
    ));
    if let Some(url) = &meta.html_url {
        lines.push(url.clone());
    }

    for file in filter_files(files, filters) {
        lines.push(format!("- [{section}] {} (+{}/-{})", file.filename, file.additions, file.deletions));
    }

    lines.join("\n")
}

/// Render the compare summary between two tags.
#[must_use]
pub fn format_compare_summary(base: &str, head: &str, info: &CompareInfo) -> String {
    let additions: u64 = info.files.iter().map(|f| f.additions).sum();
    let deletions: u64 = info.files.iter().map(|f| f.deletions).sum();

    let mut lines = Vec::with_capacity(info.files.len().min(COMPARE_FILE_BULLETS) + 3);
    lines.push(format!("Compare: {base}...{head}"));
    lines.push(format!(
        "Commits: {} | Files changed: {} | +{additions}/-{deletions}",
        info.total_commits,
        info.files.len()
    ));
    if let Some(url) = &info.html_url {
        lines.push(url.clone());
    }

    for file in info.files.iter().take(COMPARE_FILE_BULLETS) {
        lines.push(format!("- {} (+{}/-{})", file.filename, file.additions, file.deletions));
    }
    if info.files.len() > COMPARE_FILE_BULLETS {
        lines.push(format!("… and {} more files", info.files.len() - COMPARE_FILE_BULLETS));
    }

    lines.join("\n")
}

//! Error taxonomy for collection and enrichment.

use compact_str::CompactString;
use thiserror::Error;

/// Errors surfaced by collectors, enrichers, and the HTTP client.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The rate-limit retry budget is exhausted.
    #[error("rate limited by {url} (remaining: {remaining:?}, reset in {reset_in_secs:?}s)")]
    RateLimited {
        url: String,
        remaining: Option<u64>,
        reset_in_secs: Option<i64>,
    },

    /// Network-level failure that survived the transport retry budget.
    #[error("transport failure for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-retryable HTTP status (5xx after retries, unclassified 4xx).
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// Authentication or permission failure; the endpoint is skipped for the run.
    #[error("authentication failure (HTTP {status}) for {url}")]
    Auth { status: u16, url: String },

    /// A response body could not be decoded.
    #[error("could not parse response from {url}: {detail}")]
    Parse { url: String, detail: String },

    /// A syndication feed could not be parsed.
    #[error("could not parse feed {url}: {detail}")]
    Feed { url: String, detail: String },

    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration ({context}): {detail}")]
    Config { context: CompactString, detail: String },

    #[error("I/O failure ({context})")]
    Io {
        context: CompactString,
        #[source]
        source: std::io::Error,
    },

    /// A programming-error condition that should never occur at runtime.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The run was cancelled; workers drain without enqueuing new work.
    #[error("collection cancelled")]
    Cancelled,
}

impl DigestError {
    /// Build a parse error from a serde failure, keeping only a short detail string.
    pub fn parse(url: impl Into<String>, err: &dyn core::fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            detail: err.to_string(),
        }
    }

    /// Returns `true` for failures the HTTP client may retry internally.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport { .. })
    }
}

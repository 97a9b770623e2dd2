//! Runtime options fed by the scheduler through environment-style toggles.

use crate::Result;
use crate::error::DigestError;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::HashMap;
use strum::{Display, EnumString};

const LOG_TARGET: &str = "   options";

/// All day boundaries are interpreted in this fixed timezone.
const DIGEST_UTC_OFFSET_HOURS: i32 = 8;

const DEFAULT_LOOKBACK_DAYS: u32 = 7;

/// Importance floor applied by the downstream digest filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Importance {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// Runtime toggles for one collection run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of full days to look back from today's UTC+8 midnight.
    pub lookback_days: u32,

    /// Minimum importance kept by the post-summarization filter.
    pub min_importance: Importance,

    /// Resolve references from bodies/comments into full compare blocks.
    pub deep_pr_crawl: bool,

    /// Run source jobs in parallel worker pools.
    pub collect_parallel: bool,

    /// Source-level worker pool size.
    pub max_collect_threads: usize,

    /// Repo-level worker pool size inside platform jobs.
    pub max_repo_threads: usize,

    /// Write the preview document instead of handing off for delivery.
    pub dry_run: bool,
}

impl RunOptions {
    /// Parse options from an environment-style string map.
    ///
    /// Missing keys take defaults; the worker pool defaults depend on whether
    /// a platform token is available. Malformed values are rejected rather
    /// than silently defaulted.
    pub fn from_env_map(env: &HashMap<String, String>, token_present: bool) -> Result<Self> {
        let (default_collect, default_repo) = if token_present { (4, 3) } else { (2, 2) };

        let options = Self {
            lookback_days: parse_or(env, "LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?,
            min_importance: parse_or(env, "DIGEST_MIN_IMPORTANCE", Importance::default())?,
            deep_pr_crawl: parse_or(env, "DEEP_PR_CRAWL", true)?,
            collect_parallel: parse_or(env, "COLLECT_PARALLEL", true)?,
            max_collect_threads: parse_or(env, "MAX_COLLECT_THREADS", default_collect)?,
            max_repo_threads: parse_or(env, "MAX_REPO_THREADS", default_repo)?,
            dry_run: parse_or(env, "DRY_RUN", false)?,
        };

        if options.lookback_days == 0 {
            return Err(DigestError::Config {
                context: "options".into(),
                detail: "LOOKBACK_DAYS must be at least 1".to_string(),
            });
        }
        if options.max_collect_threads == 0 || options.max_repo_threads == 0 {
            return Err(DigestError::Config {
                context: "options".into(),
                detail: "worker pool sizes must be at least 1".to_string(),
            });
        }

        log::debug!(
            target: LOG_TARGET,
            "lookback={}d importance>={} deep_pr_crawl={} parallel={} pools={}x{} dry_run={}",
            options.lookback_days,
            options.min_importance,
            options.deep_pr_crawl,
            options.collect_parallel,
            options.max_collect_threads,
            options.max_repo_threads,
            options.dry_run
        );

        Ok(options)
    }

    /// The instant before which items are discarded for this run.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff_instant(now, self.lookback_days)
    }
}

/// Compute the cutoff: today's midnight in UTC+8, minus the lookback window.
#[must_use]
pub fn cutoff_instant(now: DateTime<Utc>, lookback_days: u32) -> DateTime<Utc> {
    let tz = FixedOffset::east_opt(DIGEST_UTC_OFFSET_HOURS * 3600).expect("valid fixed offset");
    let midnight = now
        .with_timezone(&tz)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_local_timezone(tz)
        .single()
        .expect("fixed offsets are unambiguous");

    (midnight - Duration::days(i64::from(lookback_days))).with_timezone(&Utc)
}

fn parse_or<T>(env: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match env.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| DigestError::Config {
            context: "options".into(),
            detail: format!("invalid {key} value '{raw}': {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn defaults_with_token() {
        let options = RunOptions::from_env_map(&HashMap::new(), true).unwrap();
        assert_eq!(options.lookback_days, 7);
        assert_eq!(options.min_importance, Importance::Medium);
        assert!(options.deep_pr_crawl);
        assert!(options.collect_parallel);
        assert_eq!(options.max_collect_threads, 4);
        assert_eq!(options.max_repo_threads, 3);
        assert!(!options.dry_run);
    }

    #[test]
    fn defaults_without_token_shrink_pools() {
        let options = RunOptions::from_env_map(&HashMap::new(), false).unwrap();
        assert_eq!(options.max_collect_threads, 2);
        assert_eq!(options.max_repo_threads, 2);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let map = env(&[
            ("LOOKBACK_DAYS", "14"),
            ("DIGEST_MIN_IMPORTANCE", "high"),
            ("DEEP_PR_CRAWL", "false"),
            ("COLLECT_PARALLEL", "false"),
            ("MAX_COLLECT_THREADS", "8"),
            ("MAX_REPO_THREADS", "1"),
            ("DRY_RUN", "true"),
        ]);
        let options = RunOptions::from_env_map(&map, false).unwrap();
        assert_eq!(options.lookback_days, 14);
        assert_eq!(options.min_importance, Importance::High);
        assert!(!options.deep_pr_crawl);
        assert!(!options.collect_parallel);
        assert_eq!(options.max_collect_threads, 8);
        assert_eq!(options.max_repo_threads, 1);
        assert!(options.dry_run);
    }

    #[test]
    fn malformed_int_is_rejected() {
        let map = env(&[("LOOKBACK_DAYS", "soon")]);
        let err = RunOptions::from_env_map(&map, true).unwrap_err();
        assert!(err.to_string().contains("LOOKBACK_DAYS"));
    }

    #[test]
    fn malformed_importance_is_rejected() {
        let map = env(&[("DIGEST_MIN_IMPORTANCE", "urgent")]);
        assert!(RunOptions::from_env_map(&map, true).is_err());
    }

    #[test]
    fn zero_lookback_is_rejected() {
        let map = env(&[("LOOKBACK_DAYS", "0")]);
        assert!(RunOptions::from_env_map(&map, true).is_err());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let map = env(&[("MAX_REPO_THREADS", "0")]);
        assert!(RunOptions::from_env_map(&map, true).is_err());
    }

    #[test]
    fn cutoff_is_midnight_utc8_minus_lookback() {
        // 2026-02-20 10:00 UTC is 2026-02-20 18:00 UTC+8; midnight UTC+8 is
        // 2026-02-19 16:00 UTC. Seven days back: 2026-02-12 16:00 UTC.
        let now = DateTime::parse_from_rfc3339("2026-02-20T10:00:00Z").unwrap().to_utc();
        let cutoff = cutoff_instant(now, 7);
        assert_eq!(cutoff.to_rfc3339(), "2026-02-12T16:00:00+00:00");
    }

    #[test]
    fn cutoff_crosses_the_date_line() {
        // 2026-02-20 20:00 UTC is already 2026-02-21 04:00 in UTC+8.
        let now = DateTime::parse_from_rfc3339("2026-02-20T20:00:00Z").unwrap().to_utc();
        let cutoff = cutoff_instant(now, 1);
        assert_eq!(cutoff.to_rfc3339(), "2026-02-19T16:00:00+00:00");
    }

    #[test]
    fn importance_ordering_is_critical_first() {
        assert!(Importance::Critical < Importance::High);
        assert!(Importance::High < Importance::Medium);
        assert!(Importance::Medium < Importance::Low);
    }
}

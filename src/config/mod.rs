//! Source configuration and runtime options.

mod options;
mod sources;

pub use options::{Importance, RunOptions, cutoff_instant};
pub use sources::{Category, CategorySources, FeedRef, ReleaseStrategy, RepoRef, SourcesConfig};

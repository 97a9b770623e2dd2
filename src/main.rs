//! Scheduler-facing entry point for the digest collection engine.

use camino::Utf8PathBuf;
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tech_digest::Result;
use tech_digest::collect::client::GITHUB_API_BASE;
use tech_digest::collect::{CategoryOrchestrator, GithubClient, Item, RunCache};
use tech_digest::config::{Category, RunOptions, SourcesConfig};
use tech_digest::error::DigestError;

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Well-known path of the dry-run preview document.
const PREVIEW_PATH: &str = "digest_preview.html";

#[derive(Parser, Debug)]
#[command(name = "tech-digest", version, about = "Collect and enrich weekly technology digest items", author)]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collection engine and emit the digest structure
    Collect(CollectArgs),
    /// Validate a sources configuration file
    Validate(ValidateArgs),
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

impl LogLevel {
    const fn filter(self) -> &'static str {
        match self {
            Self::None => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Args, Debug)]
struct CollectArgs {
    /// Path to the sources configuration file
    #[arg(long, short = 'c', default_value = "sources.yml", value_name = "PATH")]
    config: Utf8PathBuf,

    /// Platform personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN")]
    github_token: Option<String>,

    /// Write the preview document instead of printing the digest structure
    #[arg(long)]
    dry_run: bool,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: LogLevel,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Path to the sources configuration file
    #[arg(long, short = 'c', default_value = "sources.yml", value_name = "PATH")]
    config: Utf8PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Collect(args) => collect(args).await,
        Command::Validate(args) => validate(&args),
    }
}

fn init_logging(level: LogLevel) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level.filter());
    env_logger::Builder::from_env(env).init();
}

async fn collect(args: CollectArgs) -> Result<()> {
    init_logging(args.log_level);

    let env_map: HashMap<String, String> = std::env::vars().collect();
    let mut options = RunOptions::from_env_map(&env_map, args.github_token.is_some())?;
    if args.dry_run {
        options.dry_run = true;
    }

    let config = SourcesConfig::load(&args.config)?;
    let client = Arc::new(GithubClient::new(args.github_token.as_deref(), GITHUB_API_BASE)?);
    let cache = Arc::new(RunCache::new());

    let now = chrono::Utc::now();
    let cutoff = options.cutoff(now);
    let dry_run = options.dry_run;
    let orchestrator = CategoryOrchestrator::new(client, cache, options, cutoff);
    log::info!("[{}] Collecting items published since {cutoff}", orchestrator.run_id());

    let digest = orchestrator.collect_all(&config).await;

    for (category, items) in &digest {
        eprintln!("{category}: {} item(s)", items.len());
    }

    if dry_run {
        write_preview(&digest, PREVIEW_PATH)?;
        eprintln!("Preview written to {PREVIEW_PATH}");
    } else {
        // The summarization collaborator consumes the category→items map.
        let serialized = serde_json::to_string_pretty(&digest).map_err(|e| DigestError::parse("digest", &e))?;
        println!("{serialized}");
    }

    Ok(())
}

fn validate(args: &ValidateArgs) -> Result<()> {
    let config = SourcesConfig::load(&args.config)?;

    for category in [Category::Frontend, Category::Backend, Category::Devops] {
        let sources = config.category(category);
        println!(
            "{category}: {} repo(s), {} feed(s), {} package(s), {} advisory ecosystem(s)",
            sources.repos.len(),
            sources.feeds.len(),
            sources.registries.len(),
            sources.advisories.len()
        );
    }
    println!("Configuration is valid");
    Ok(())
}

/// Minimal HTML snapshot for dry runs; rendering proper lives downstream.
fn write_preview(digest: &std::collections::BTreeMap<Category, Vec<Item>>, path: &str) -> Result<()> {
    let mut html = String::from("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Digest preview</title></head><body>\n");

    for (category, items) in digest {
        html.push_str(&format!("<h2>{category}</h2>\n<ul>\n"));
        for item in items {
            html.push_str(&format!(
                "<li><a href=\"{}\">{}</a> <small>{} · {}</small><pre>{}</pre></li>\n",
                escape_html(&item.url),
                escape_html(&item.title),
                item.published_at.format("%Y-%m-%d"),
                item.source,
                escape_html(&item.body),
            ));
        }
        html.push_str("</ul>\n");
    }
    html.push_str("</body></html>\n");

    let mut file = std::fs::File::create(path).map_err(|e| DigestError::Io {
        context: format!("creating preview file '{path}'").into(),
        source: e,
    })?;
    file.write_all(html.as_bytes()).map_err(|e| DigestError::Io {
        context: format!("writing preview file '{path}'").into(),
        source: e,
    })?;

    Ok(())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use zotfeed::app::{generate_feed, FeedJob};
use zotfeed::config::{Config, Settings};
use zotfeed::feed::AtomFileSink;
use zotfeed::zotero::ZoteroClient;

const DEFAULT_LEVEL: tracing::Level = tracing::Level::WARN;

#[derive(Parser, Debug)]
#[command(
    name = "zotfeed",
    about = "Produce an Atom feed of a Zotero collection's top-level items"
)]
struct Args {
    /// Config file (TOML, or JSON with a .json extension); options below override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Logging level: ERROR, WARN, INFO, DEBUG or TRACE (RUST_LOG takes precedence)
    #[arg(short, long, value_name = "LEVEL")]
    loglevel: Option<String>,

    /// More output: -v for INFO, -vv for DEBUG
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Zotero account in the form 'groups/1234' or 'users/1234'
    #[arg(long, visible_alias = "za", alias = "zotero_account")]
    zotero_account: Option<String>,

    /// Zotero collection key, e.g. A1B2C3D4
    #[arg(short = 'k', long, visible_alias = "zc", alias = "zotero_collection")]
    zotero_collection: Option<String>,

    /// Maximum number of items in the feed
    #[arg(short, long)]
    maximum: Option<usize>,

    /// Domain for the feed's tag URI, e.g. 'nowhere.com'
    #[arg(long, visible_alias = "td", alias = "tag_domain")]
    tag_domain: Option<String>,

    /// Slug for the feed's tag URI, e.g. '/my/path/to/my-feed'
    #[arg(long, visible_alias = "ts", alias = "tag_slug")]
    tag_slug: Option<String>,

    /// Day date for the feed's tag URI, e.g. '2010-03-07'
    #[arg(long, visible_alias = "tw", alias = "tag_date")]
    tag_date: Option<String>,

    /// Feed title
    #[arg(short, long)]
    title: Option<String>,

    /// Name of the feed author
    #[arg(short = 'a', long, alias = "author_name")]
    author_name: Option<String>,

    /// Email of the feed author
    #[arg(short = 'e', long, alias = "author_email")]
    author_email: Option<String>,

    /// URI to use for the feed's self link
    #[arg(short = 's', long = "self-link", alias = "self")]
    self_link: Option<String>,

    /// Output file path
    #[arg(short, long, value_name = "FILE", alias = "out_path")]
    out_path: Option<PathBuf>,

    /// Seconds to pause before every API request
    #[arg(short, long)]
    pause: Option<f64>,

    /// API root, defaults to https://api.zotero.org
    #[arg(long, value_name = "URL")]
    api_base: Option<String>,
}

impl Args {
    fn overrides(&self) -> Config {
        Config {
            zotero_account: self.zotero_account.clone(),
            zotero_collection: self.zotero_collection.clone(),
            maximum: self.maximum,
            tag_domain: self.tag_domain.clone(),
            tag_date: self.tag_date.clone(),
            tag_slug: self.tag_slug.clone(),
            title: self.title.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
            self_link: self.self_link.clone(),
            out_path: self.out_path.clone(),
            pause: self.pause,
            api_base: self.api_base.clone(),
            ..Default::default()
        }
    }

    fn log_filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }

        let mut level = DEFAULT_LEVEL;
        if let Some(name) = &self.loglevel {
            match name.trim().parse::<tracing::Level>() {
                Ok(parsed) => level = parsed,
                Err(_) => eprintln!(
                    "Warning: '{}' is not a valid log level; using {}",
                    name, DEFAULT_LEVEL
                ),
            }
        }
        match self.verbose {
            0 => {}
            1 => level = tracing::Level::INFO,
            _ => level = tracing::Level::DEBUG,
        }

        EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_filter())
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => Config::default(),
    };
    config.overlay(args.overrides());
    tracing::debug!(config = ?config, "Effective configuration");

    let Settings {
        collection,
        maximum,
        identity,
        out_path,
        client,
    } = config.settings().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling pending requests");
            on_signal.cancel();
        }
    });

    let mut client = ZoteroClient::new(client)
        .context("Failed to create HTTP client")?
        .with_cancellation(cancel);

    let job = FeedJob {
        collection: &collection,
        maximum,
        identity: &identity,
        destination: &out_path,
    };
    let mut sink = AtomFileSink::new();
    generate_feed(&mut client, &job, &mut sink)
        .await
        .with_context(|| {
            format!(
                "Failed to build feed for {}/collections/{}",
                collection.account_path, collection.collection_id
            )
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_author_short_flags() {
        let args = Args::try_parse_from(["zotfeed", "-a", "Jane", "-e", "jane@example.org"]).unwrap();
        assert_eq!(args.author_name.as_deref(), Some("Jane"));
        assert_eq!(args.author_email.as_deref(), Some("jane@example.org"));
        assert_eq!(args.zotero_account, None);
    }

    #[test]
    fn test_underscore_long_flags() {
        let args = Args::try_parse_from([
            "zotfeed",
            "--zotero_account",
            "groups/1234",
            "--zc",
            "A1B2C3D4",
            "--tag_date",
            "2010-03-07",
            "--self",
            "https://example.org/feed.atom",
            "--out_path",
            "feed.atom",
        ])
        .unwrap();
        assert_eq!(args.zotero_account.as_deref(), Some("groups/1234"));
        assert_eq!(args.zotero_collection.as_deref(), Some("A1B2C3D4"));
        assert_eq!(args.tag_date.as_deref(), Some("2010-03-07"));
        assert_eq!(args.self_link.as_deref(), Some("https://example.org/feed.atom"));
        assert_eq!(args.out_path, Some(PathBuf::from("feed.atom")));
    }

    #[test]
    fn test_verbose_raises_level_over_loglevel() {
        let args = Args::try_parse_from(["zotfeed", "-l", "error", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.loglevel.as_deref(), Some("error"));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{DEFAULT_DELAY_MS, DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};

#[derive(Parser, Debug)]
#[command(
    name = "website-replicator",
    about = "Create an offline copy of a web page and the resources it uses",
    version,
    long_about = "Downloads a single page together with its stylesheets, scripts, images and fonts, rewrites the page so it references the local copies, and writes everything to a directory that can be browsed offline.",
    after_help = "Examples:\n  website-replicator https://example.com\n  website-replicator https://example.com -o my_replica\n  website-replicator https://example.com --include-external"
)]
pub struct ReplicateCommand {
    /// URL of the page to replicate
    #[arg(required = true)]
    pub url: String,

    /// Output directory (default: replica_<host>_<timestamp>)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Include external resources (CDN, etc.). Accepted but currently has no effect.
    #[arg(long)]
    pub include_external: bool,

    /// Maximum concurrent resource downloads
    #[arg(short = 'c', long, default_value_t = DEFAULT_MAX_CONCURRENT, value_parser = parse_positive)]
    pub max_concurrent: usize,

    /// Minimum delay between the start of two requests, in milliseconds
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    pub delay_ms: u64,

    /// Timeout for each request in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// User agent string sent with every request
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl ReplicateCommand {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "website_replicator=error",
            (false, 0) => "website_replicator=warn",
            (false, 1) => "website_replicator=debug",
            (false, _) => "website_replicator=trace",
        }
    }
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

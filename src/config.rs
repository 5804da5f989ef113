use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use url::Url;

use crate::cli::ReplicateCommand;
use crate::error::{ReplicaError, Result};
use crate::resolver::authority;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Validated settings for one replication run.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub url: Url,
    pub output_dir: PathBuf,
    /// Accepted for compatibility; has no effect yet.
    pub include_external: bool,
    pub max_concurrent: usize,
    pub delay: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl ReplicaConfig {
    /// Defaults for `url`, writing into `output_dir`.
    pub fn new(url: &str, output_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            url: parse_target(url)?,
            output_dir: output_dir.into(),
            include_external: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn from_command(command: &ReplicateCommand) -> Result<Self> {
        let url = parse_target(&command.url)?;
        let output_dir = command
            .output
            .clone()
            .unwrap_or_else(|| default_output_dir(&url, Local::now()));

        Ok(Self {
            url,
            output_dir,
            include_external: command.include_external,
            max_concurrent: command.max_concurrent,
            delay: Duration::from_millis(command.delay_ms),
            timeout: Duration::from_secs(command.timeout),
            user_agent: command.user_agent.clone(),
        })
    }
}

/// `replica_<host>_<YYYYmmdd_HHMMSS>` in the working directory.
pub fn default_output_dir(url: &Url, now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!(
        "replica_{}_{}",
        authority(url).replace(':', "_"),
        now.format("%Y%m%d_%H%M%S")
    ))
}

fn parse_target(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).map_err(|source| ReplicaError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ReplicaError::UnsupportedScheme(other.to_string())),
    }
}

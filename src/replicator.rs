use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use url::Url;

use crate::config::ReplicaConfig;
use crate::downloader::{DownloadRecord, Downloader, Statistics};
use crate::error::{ReplicaError, Result};
use crate::extractor::{Extractor, ResourceSet};
use crate::fetch::{Fetch, HttpFetcher};
use crate::file_manager::FileManager;
use crate::report::{self, ReadmeContext, FAILURES_FILE, INDEX_FILE};
use crate::resolver::{Category, ResourceUrl};
use crate::rewriter::{declare_utf8, staticize, Rewriter};

const PHASES: usize = 7;

/// Everything a finished run produced.
#[derive(Debug)]
pub struct ReplicationReport {
    /// The URL that was asked for.
    pub requested_url: Url,
    /// Where the page was actually served from, after redirects.
    pub page_url: Url,
    pub output_dir: PathBuf,
    pub resources: ResourceSet,
    pub records: BTreeMap<Url, DownloadRecord>,
    /// `(url, reason)`, ordered by URL.
    pub failures: Vec<(Url, String)>,
    pub stats: Statistics,
    pub placeholders: usize,
}

impl ReplicationReport {
    pub fn downloaded(&self) -> usize {
        self.records.values().filter(|r| r.is_success()).count()
    }

    pub fn index_path(&self) -> PathBuf {
        self.output_dir.join(INDEX_FILE)
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("📊 REPLICATION RESULTS");
        println!("{}", "=".repeat(60));

        println!("\n✅ Successfully replicated: {}", self.requested_url.as_str().blue());
        println!("📁 Output directory: {}", self.output_dir.display());
        println!("📦 Total size: {:.2} MB", self.stats.total_mb());

        println!("\n📈 File statistics:");
        println!("   - pages: {} files", self.stats.pages());
        for category in Category::ALL {
            let count = self.stats.count(category);
            if count > 0 {
                println!("   - {}: {} files", category.manifest_key(), count);
            }
        }

        if !self.failures.is_empty() {
            println!(
                "\n{}",
                format!("⚠️  Failed downloads: {}", self.failures.len()).yellow()
            );
            println!("   (See {FAILURES_FILE} for details)");
        }
    }
}

/// Runs one page replication from fetch to helper files.
pub struct WebsiteReplicator {
    config: ReplicaConfig,
    fetcher: Arc<dyn Fetch>,
}

impl WebsiteReplicator {
    /// Replicates over HTTP(S) with the configured user agent and timeout.
    pub fn new(config: ReplicaConfig) -> Result<Self> {
        let fetcher =
            HttpFetcher::new(&config.user_agent, config.timeout).map_err(ReplicaError::HttpClient)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    pub fn with_fetcher(config: ReplicaConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self { config, fetcher }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// Only a failure to fetch the page itself, or to write into the output
    /// directory, is an error. Resource failures end up in the report.
    pub async fn replicate(&self) -> Result<ReplicationReport> {
        let config = &self.config;
        println!("\n🚀 Website Replicator v{}", env!("CARGO_PKG_VERSION"));
        println!("📍 Target URL: {}", config.url.as_str().blue());
        println!("📁 Output Directory: {}", config.output_dir.display());
        if config.include_external {
            tracing::info!("--include-external has no effect yet");
        }
        println!("{}", "=".repeat(60));

        let file_manager = FileManager::new(&config.output_dir)?;

        phase(1, "📄 Fetching HTML...");
        let page = self.fetcher.fetch(&config.url).await.map_err(|source| {
            eprintln!("{}", format!("❌ Failed to fetch HTML: {source}").red());
            ReplicaError::PageFetch {
                url: config.url.to_string(),
                source,
            }
        })?;
        let (mut html, encoding) = page.decode_text();
        if encoding != encoding_rs::UTF_8 {
            // The page is saved as UTF-8, so its declaration has to say so.
            tracing::debug!(encoding = encoding.name(), "decoded page from non-UTF-8 charset");
            html = declare_utf8(&html);
        }
        let page_url = page.final_url.clone();
        if page_url != config.url {
            tracing::info!(from = %config.url, to = %page_url, "page was redirected");
        }
        println!("✅ Fetched HTML ({} characters)", html.chars().count());

        phase(2, "🔍 Extracting resources...");
        let mut resources = Extractor::new(&page_url).extract_resources(&html);
        println!("✅ Found {} resources:", resources.len());
        for category in Category::ALL {
            let count = resources.count(category);
            if count > 0 {
                println!("   - {}: {} files", category.manifest_key(), count);
            }
        }
        report::write_manifest(&file_manager, &resources)?;

        phase(3, "📥 Downloading resources...");
        let downloader = Downloader::new(
            Arc::clone(&self.fetcher),
            file_manager.clone(),
            &page_url,
            config.max_concurrent,
            config.delay,
        )
        .with_progress(progress_bar());
        downloader.stats().record_page(page.bytes.len() as u64);
        downloader.download_all(&mut resources).await;

        let failures = downloader.ledger().failures();
        println!("✅ Downloaded {} files", downloader.ledger().succeeded_count());
        if !failures.is_empty() {
            println!("{}", format!("⚠️  Failed: {} files", failures.len()).yellow());
        }
        // Stylesheets may have revealed more URLs since the first write.
        report::write_manifest(&file_manager, &resources)?;

        phase(4, "🔄 Converting paths...");
        let html = Rewriter::new(&page_url).convert_paths(&html);

        phase(5, "🔧 Fixing missing resources...");
        let mut placeholders = 0;
        for (url, _) in &failures {
            if !resources.contains(&ResourceUrl::new(url.clone(), Category::Image)) {
                continue;
            }
            let local_path = downloader.mapper().local_path(url);
            if file_manager.write_placeholder(&local_path)? {
                tracing::debug!(%url, path = %local_path, "wrote placeholder image");
                placeholders += 1;
            }
        }
        if placeholders > 0 {
            println!("✅ Created {placeholders} placeholder images");
        }

        phase(6, "📦 Staticizing dynamic content...");
        let html = staticize(&html);

        phase(7, "💾 Saving final HTML...");
        let index_path = file_manager.save_root_file(INDEX_FILE, html.as_bytes())?;
        println!("✅ Saved to {}", index_path.display());

        report::write_failure_report(&file_manager, &failures)?;
        let site = downloader.mapper().site().to_string();
        let (ledger, stats) = downloader.finish();
        report::write_helper_files(
            &file_manager,
            &ReadmeContext {
                site: &site,
                page_url: &config.url,
                generated_at: Local::now(),
                files: ledger.succeeded_count(),
                total_mb: stats.total_mb(),
                failures: failures.len(),
            },
        )?;

        Ok(ReplicationReport {
            requested_url: config.url.clone(),
            page_url,
            output_dir: file_manager.base_dir().to_path_buf(),
            resources,
            records: ledger.records(),
            failures,
            stats,
            placeholders,
        })
    }
}

fn phase(n: usize, title: &str) {
    tracing::info!(phase = n, "{title}");
    println!("\n{} {}", format!("[{n}/{PHASES}]").bold(), title);
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

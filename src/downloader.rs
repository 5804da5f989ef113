use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use tokio::time::Instant;
use url::Url;

use crate::error::ReplicaError;
use crate::extractor::{Extractor, ResourceSet};
use crate::fetch::{Fetch, FetchedBody};
use crate::file_manager::FileManager;
use crate::local_path::{LocalPath, PathMapper};
use crate::report::GENERATED_FILES;
use crate::resolver::{Category, ResourceUrl};
use crate::rewriter::Rewriter;

/// Final state of one attempted URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadRecord {
    Succeeded { local_path: LocalPath, bytes: u64 },
    Failed { reason: String },
}

impl DownloadRecord {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadRecord::Succeeded { .. })
    }
}

/// Outcome of trying to claim a URL before fetching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// First time this URL is seen; the caller must fetch it and `complete` it.
    Granted,
    /// The URL was claimed earlier (possibly under another category).
    AlreadyClaimed,
    /// Another URL or a generated file already owns the local path. The URL
    /// has been recorded as failed.
    Collision { owner: String },
}

#[derive(Debug)]
enum Entry {
    InFlight,
    Done(DownloadRecord),
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeMap<Url, Entry>,
    paths: HashMap<LocalPath, String>,
}

/// Every URL attempted during one run and the local path each one owns.
///
/// Claims are check-and-set under one lock, which is what makes downloads
/// at-most-once per URL.
#[derive(Debug, Default)]
pub struct DownloadLedger {
    state: Mutex<LedgerState>,
}

impl DownloadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keeps `path` away from downloads, e.g. for files the run writes itself.
    pub fn reserve_path(&self, path: LocalPath) {
        let owner = format!("generated file {path}");
        self.lock().paths.insert(path, owner);
    }

    pub fn claim(&self, url: &Url, path: &LocalPath) -> Claim {
        let mut state = self.lock();
        if state.entries.contains_key(url) {
            return Claim::AlreadyClaimed;
        }

        if let Some(owner) = state.paths.get(path).cloned() {
            let reason = format!("local path collision with {owner}");
            state
                .entries
                .insert(url.clone(), Entry::Done(DownloadRecord::Failed { reason }));
            return Claim::Collision { owner };
        }

        state.paths.insert(path.clone(), url.to_string());
        state.entries.insert(url.clone(), Entry::InFlight);
        Claim::Granted
    }

    pub fn complete(&self, url: &Url, record: DownloadRecord) {
        self.lock().entries.insert(url.clone(), Entry::Done(record));
    }

    pub fn is_downloaded(&self, url: &Url) -> bool {
        matches!(
            self.lock().entries.get(url),
            Some(Entry::Done(DownloadRecord::Succeeded { .. }))
        )
    }

    /// Settled records, ordered by URL.
    pub fn records(&self) -> BTreeMap<Url, DownloadRecord> {
        self.lock()
            .entries
            .iter()
            .filter_map(|(url, entry)| match entry {
                Entry::Done(record) => Some((url.clone(), record.clone())),
                Entry::InFlight => None,
            })
            .collect()
    }

    /// `(url, reason)` for every failure, ordered by URL.
    pub fn failures(&self) -> Vec<(Url, String)> {
        self.lock()
            .entries
            .iter()
            .filter_map(|(url, entry)| match entry {
                Entry::Done(DownloadRecord::Failed { reason }) => {
                    Some((url.clone(), reason.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|entry| matches!(entry, Entry::Done(DownloadRecord::Succeeded { .. })))
            .count()
    }
}

/// Running counters, only ever bumped by the downloader.
#[derive(Debug, Default)]
pub struct Statistics {
    pages: AtomicUsize,
    files: [AtomicUsize; Category::ALL.len()],
    total_bytes: AtomicU64,
}

impl Statistics {
    pub fn record_page(&self, bytes: u64) {
        self.pages.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record(&self, category: Category, bytes: u64) {
        self.files[category as usize].fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }

    pub fn count(&self, category: Category) -> usize {
        self.files[category as usize].load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn total_mb(&self) -> f64 {
        self.total_bytes() as f64 / 1024.0 / 1024.0
    }
}

/// Spaces request starts at least `interval` apart, across all workers.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let start = match *next_slot {
            Some(slot) if slot > now => {
                tokio::time::sleep_until(slot).await;
                slot
            }
            _ => now,
        };
        *next_slot = Some(start + self.interval);
    }
}

/// Downloads every resource of a page exactly once, following stylesheet
/// dependencies as they are discovered.
pub struct Downloader {
    fetcher: Arc<dyn Fetch>,
    file_manager: FileManager,
    mapper: PathMapper,
    rewriter: Rewriter,
    ledger: DownloadLedger,
    stats: Statistics,
    throttle: Throttle,
    max_concurrent: usize,
    progress: ProgressBar,
}

impl Downloader {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        file_manager: FileManager,
        page_url: &Url,
        max_concurrent: usize,
        delay: Duration,
    ) -> Self {
        let ledger = DownloadLedger::new();
        for name in GENERATED_FILES {
            ledger.reserve_path(LocalPath::new(name));
        }

        Self {
            fetcher,
            file_manager,
            mapper: PathMapper::new(page_url),
            rewriter: Rewriter::new(page_url),
            ledger,
            stats: Statistics::default(),
            throttle: Throttle::new(delay),
            max_concurrent: max_concurrent.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports each settled resource on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn ledger(&self) -> &DownloadLedger {
        &self.ledger
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// Hands back the ledger and counters once the batch is over.
    pub fn finish(self) -> (DownloadLedger, Statistics) {
        self.progress.finish_and_clear();
        (self.ledger, self.stats)
    }

    /// Fetches every member of `resources`. Stylesheet dependencies found along
    /// the way are added to `resources` and fetched too. Individual failures
    /// are recorded in the ledger and never abort the batch.
    pub async fn download_all(&self, resources: &mut ResourceSet) {
        let mut queue: VecDeque<ResourceUrl> = resources.iter().collect();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.max_concurrent {
                let Some(resource) = queue.pop_front() else {
                    break;
                };
                let local_path = self.mapper.local_path(&resource.url);
                match self.ledger.claim(&resource.url, &local_path) {
                    Claim::Granted => {
                        self.progress.inc_length(1);
                        in_flight.push(self.download_resource(resource, local_path));
                    }
                    Claim::AlreadyClaimed => {
                        tracing::debug!(url = %resource.url, "already claimed, skipping");
                    }
                    Claim::Collision { owner } => {
                        tracing::warn!(
                            url = %resource.url,
                            path = %local_path,
                            %owner,
                            "local path already taken"
                        );
                    }
                }
            }

            let Some(discovered) = in_flight.next().await else {
                break;
            };
            for dependency in discovered {
                if resources.insert(dependency.clone()) {
                    queue.push_back(dependency);
                }
            }
        }
    }

    /// Fetches and stores one claimed resource; returns the stylesheet
    /// dependencies it revealed.
    async fn download_resource(
        &self,
        resource: ResourceUrl,
        local_path: LocalPath,
    ) -> Vec<ResourceUrl> {
        self.throttle.wait().await;
        self.progress.set_message(short_name(&resource.url));

        let (record, discovered) = match self.fetcher.fetch(&resource.url).await {
            Ok(body) => {
                let bytes = body.bytes.len() as u64;
                match self.store(&resource, &local_path, &body) {
                    Ok(discovered) => {
                        self.stats.record(resource.category, bytes);
                        tracing::debug!(url = %resource.url, path = %local_path, bytes, "downloaded");
                        (DownloadRecord::Succeeded { local_path, bytes }, discovered)
                    }
                    Err(e) => {
                        tracing::warn!(url = %resource.url, error = %e, "failed to save resource");
                        (DownloadRecord::Failed { reason: e.to_string() }, Vec::new())
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %resource.url, error = %e, "failed to download resource");
                (DownloadRecord::Failed { reason: e.to_string() }, Vec::new())
            }
        };

        self.ledger.complete(&resource.url, record);
        self.progress.inc(1);
        discovered
    }

    fn store(
        &self,
        resource: &ResourceUrl,
        local_path: &LocalPath,
        body: &FetchedBody,
    ) -> Result<Vec<ResourceUrl>, ReplicaError> {
        if resource.category != Category::Css && !body.is_stylesheet() {
            self.file_manager.save_file(local_path, &body.bytes)?;
            return Ok(Vec::new());
        }

        let dependencies = match std::str::from_utf8(&body.bytes) {
            Ok(css) => {
                let rewritten = self.rewriter.rewrite_stylesheet(css, &resource.url);
                self.file_manager.save_file(local_path, rewritten.as_bytes())?;
                Extractor::new(&resource.url).extract_stylesheet_dependencies(css)
            }
            Err(_) => {
                self.file_manager.save_file(local_path, &body.bytes)?;
                let css = String::from_utf8_lossy(&body.bytes);
                Extractor::new(&resource.url).extract_stylesheet_dependencies(&css)
            }
        };
        tracing::debug!(
            url = %resource.url,
            count = dependencies.len(),
            "stylesheet dependencies"
        );
        Ok(dependencies)
    }
}

fn short_name(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or(url.as_str());
    name.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::MockFetch;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const PAGE: &str = "https://ex.com/";

    fn page_url() -> Url {
        Url::parse(PAGE).unwrap()
    }

    fn resource(url: &str, category: Category) -> ResourceUrl {
        ResourceUrl::new(Url::parse(url).unwrap(), category)
    }

    /// A mock serving `site` (url -> (content type, body)), 404 for anything else.
    fn mock_site(site: &[(&str, &str, &str)], calls: usize) -> MockFetch {
        let site: HashMap<String, (String, Vec<u8>)> = site
            .iter()
            .map(|(url, ct, body)| (url.to_string(), (ct.to_string(), body.as_bytes().to_vec())))
            .collect();

        let mut fetcher = MockFetch::new();
        fetcher
            .expect_fetch()
            .times(calls)
            .returning(move |url| match site.get(url.as_str()) {
                Some((content_type, bytes)) => Ok(FetchedBody {
                    final_url: url.clone(),
                    content_type: Some(content_type.clone()),
                    bytes: bytes.clone(),
                }),
                None => Err(FetchError::Status {
                    status: 404,
                    reason: "Not Found".to_string(),
                }),
            });
        fetcher
    }

    fn downloader(fetcher: MockFetch) -> (Downloader, TempDir) {
        let temp_dir = tempdir().unwrap();
        let file_manager = FileManager::new(temp_dir.path()).unwrap();
        let downloader = Downloader::new(
            Arc::new(fetcher),
            file_manager,
            &page_url(),
            4,
            Duration::ZERO,
        );
        (downloader, temp_dir)
    }

    #[tokio::test]
    async fn test_url_in_two_categories_is_fetched_once() {
        let fetcher = mock_site(&[("https://ex.com/a.png", "image/png", "png")], 1);
        let (downloader, temp_dir) = downloader(fetcher);

        let mut resources = ResourceSet::new();
        resources.insert(resource("https://ex.com/a.png", Category::Image));
        resources.insert(resource("https://ex.com/a.png", Category::Other));
        downloader.download_all(&mut resources).await;

        assert_eq!(fs::read_to_string(temp_dir.path().join("a.png")).unwrap(), "png");
        assert_eq!(downloader.stats().count(Category::Image), 1);
        assert_eq!(downloader.stats().count(Category::Other), 0);
        assert_eq!(downloader.ledger().records().len(), 1);
    }

    #[tokio::test]
    async fn test_stylesheet_dependencies_are_followed() {
        let fetcher = mock_site(
            &[
                (
                    "https://ex.com/css/s.css",
                    "text/css",
                    "@import \"more.css\";\nbody { background: url(/img/bg.png); }",
                ),
                ("https://ex.com/css/more.css", "text/css", "p { background: url(../img/bg.png); }"),
                ("https://ex.com/img/bg.png", "image/png", "bg"),
            ],
            3,
        );
        let (downloader, temp_dir) = downloader(fetcher);

        let mut resources = ResourceSet::new();
        resources.insert(resource("https://ex.com/css/s.css", Category::Css));
        downloader.download_all(&mut resources).await;

        assert_eq!(resources.count(Category::Css), 2);
        assert_eq!(resources.count(Category::Image), 1);
        assert_eq!(downloader.ledger().succeeded_count(), 3);
        assert!(downloader.ledger().failures().is_empty());

        let saved = fs::read_to_string(temp_dir.path().join("css/s.css")).unwrap();
        assert!(saved.contains("url(../img/bg.png)"), "stylesheet not rewritten: {saved}");
        assert_eq!(fs::read_to_string(temp_dir.path().join("img/bg.png")).unwrap(), "bg");
        assert_eq!(downloader.stats().count(Category::Css), 2);
    }

    #[tokio::test]
    async fn test_css_content_type_triggers_dependency_scan() {
        let fetcher = mock_site(
            &[
                ("https://ex.com/theme", "text/css; charset=utf-8", "a { background: url(x.gif) }"),
                ("https://ex.com/x.gif", "image/gif", "gif"),
            ],
            2,
        );
        let (downloader, _temp_dir) = downloader(fetcher);

        let mut resources = ResourceSet::new();
        resources.insert(resource("https://ex.com/theme", Category::Other));
        downloader.download_all(&mut resources).await;

        assert!(downloader.ledger().is_downloaded(&Url::parse("https://ex.com/x.gif").unwrap()));
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_not_fatal() {
        let fetcher = mock_site(&[("https://ex.com/ok.js", "text/javascript", "ok()")], 2);
        let (downloader, _temp_dir) = downloader(fetcher);

        let mut resources = ResourceSet::new();
        resources.insert(resource("https://ex.com/missing.css", Category::Css));
        resources.insert(resource("https://ex.com/ok.js", Category::Script));
        downloader.download_all(&mut resources).await;

        let records = downloader.ledger().records();
        assert_eq!(records.len(), 2);
        assert_eq!(
            downloader.ledger().failures(),
            vec![(
                Url::parse("https://ex.com/missing.css").unwrap(),
                "HTTP 404 Not Found".to_string()
            )]
        );
        assert!(records[&Url::parse("https://ex.com/ok.js").unwrap()].is_success());
        assert_eq!(downloader.stats().total_bytes(), 4);
    }

    #[tokio::test]
    async fn test_path_collision_is_reported_not_overwritten() {
        let fetcher = mock_site(
            &[
                ("https://ex.com/a.css?v=1", "text/css", "first"),
                ("https://ex.com/a_v=1.css", "text/css", "second"),
            ],
            1,
        );
        let (downloader, temp_dir) = downloader(fetcher);

        let mut resources = ResourceSet::new();
        resources.insert(resource("https://ex.com/a.css?v=1", Category::Css));
        resources.insert(resource("https://ex.com/a_v=1.css", Category::Css));
        downloader.download_all(&mut resources).await;

        // Ordered by URL: `a.css?v=1` sorts before `a_v=1.css` and wins the path.
        assert_eq!(fs::read_to_string(temp_dir.path().join("a_v=1.css")).unwrap(), "first");
        let failures = downloader.ledger().failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.as_str(), "https://ex.com/a_v=1.css");
        assert_eq!(
            failures[0].1,
            "local path collision with https://ex.com/a.css?v=1"
        );
    }

    #[tokio::test]
    async fn test_generated_files_are_reserved() {
        let fetcher = mock_site(&[], 0);
        let (downloader, _temp_dir) = downloader(fetcher);

        let mut resources = ResourceSet::new();
        resources.insert(resource("https://ex.com/index.html", Category::Other));
        downloader.download_all(&mut resources).await;

        let failures = downloader.ledger().failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, "local path collision with generated file index.html");
    }

    #[test]
    fn test_claim_is_check_and_set() {
        let ledger = DownloadLedger::new();
        let url = Url::parse("https://ex.com/a.js").unwrap();
        let path = LocalPath::new("a.js");

        assert_eq!(ledger.claim(&url, &path), Claim::Granted);
        assert_eq!(ledger.claim(&url, &path), Claim::AlreadyClaimed);
        assert!(!ledger.is_downloaded(&url));

        ledger.complete(&url, DownloadRecord::Failed { reason: "boom".into() });
        // Failures are not retried within a run.
        assert_eq!(ledger.claim(&url, &path), Claim::AlreadyClaimed);
    }

    #[test]
    fn test_statistics_counters() {
        let stats = Statistics::default();
        stats.record_page(1024);
        stats.record(Category::Font, 1024 * 1024);
        stats.record(Category::Font, 0);

        assert_eq!(stats.pages(), 1);
        assert_eq!(stats.count(Category::Font), 2);
        assert_eq!(stats.count(Category::Css), 0);
        assert_eq!(stats.total_bytes(), 1024 * 1024 + 1024);
        assert!((stats.total_mb() - 1.0009765625).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_requests() {
        let throttle = Throttle::new(Duration::from_millis(100));
        let start = Instant::now();
        for _ in 0..3 {
            throttle.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name(&Url::parse("https://ex.com/a/b/c.png?x=1").unwrap()), "c.png");
        assert_eq!(short_name(&Url::parse("https://ex.com/").unwrap()), "https://ex.com/");
    }
}

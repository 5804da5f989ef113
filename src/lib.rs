pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod file_manager;
pub mod local_path;
pub mod replicator;
pub mod report;
pub mod resolver;
pub mod rewriter;

// Re-export main types for convenience
pub use cli::ReplicateCommand;
pub use config::ReplicaConfig;
pub use downloader::{DownloadLedger, DownloadRecord, Downloader, Statistics};
pub use error::{FetchError, ReplicaError};
pub use extractor::{Extractor, ResourceSet};
pub use fetch::{Fetch, FetchedBody, HttpFetcher};
pub use file_manager::FileManager;
pub use local_path::{LocalPath, PathMapper};
pub use replicator::{ReplicationReport, WebsiteReplicator};
pub use resolver::{Category, ResourceUrl};
pub use rewriter::Rewriter;

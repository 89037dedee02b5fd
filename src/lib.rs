//! Track matching and batch download orchestration.
//!
//! A [`BatchManager`] resolves track URLs into [`DownloadTask`]s and hands them
//! to a [`DownloadManager`], which searches every configured
//! [`CandidateSource`], picks the best candidate with the [`Matcher`], and
//! fetches it through an [`AudioFetcher`] with bounded concurrency and
//! exponential-backoff retries.

pub mod api;
pub mod batch;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod processing;
pub mod search;
pub mod utils;

pub use api::{Track, TrackResolver};
pub use batch::{BatchManager, BatchReport, BatchStatus, EnqueueReport};
pub use config::AppConfig;
pub use downloader::{
    AudioFetcher, DownloadManager, DownloadStatus, DownloadTask, FetchProgress, ProgressEvent,
    QueueStats, TaskOutcome,
};
pub use errors::{AppError, Result, TaskError};
pub use processing::PostProcessor;
pub use search::{Candidate, CandidateSource, MatchResult, Matcher, Provider, SearchManager};

/// Installs `env_logger` with `info` as the default level; `RUST_LOG`
/// overrides it. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
